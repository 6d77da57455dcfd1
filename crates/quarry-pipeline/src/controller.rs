//! Pipeline controller: drives one run through the stage graph.
//!
//! ```text
//! load_schema -> { access_check, rank_tables } -> gate -> format_schema
//!     -> generate -> validate -> (generate | explain) -> done
//! ```
//!
//! Stage handlers read `&PipelineState` and return a [`StateUpdate`]; only
//! [`Controller::run`] mutates the state. Runs share nothing mutable, so one
//! controller may serve concurrent runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use quarry_types::{CandidateValidation, QuarryError, Result, ScoredTable};

use crate::arbiter::CandidateArbiter;
use crate::collaborators::{Collaborators, TextGenerator};
use crate::config::PipelineConfig;
use crate::discovery::TableRanker;
use crate::events::{EventEmitter, PipelineEvent};
use crate::explain::{Explainer, Explanation};
use crate::gate::{apply_gate, GateResult};
use crate::generation::CandidateGenerator;
use crate::retry::RetryingGenerator;
use crate::schema_format::format_schema;
use crate::state::{AttemptRecord, PipelineState, StateUpdate};

// ---------------------------------------------------------------------------
// Stage graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadSchema,
    AccessCheck,
    RankTables,
    Gate,
    FormatSchema,
    Generate,
    Validate,
    Explain,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LoadSchema => "load_schema",
            Stage::AccessCheck => "access_check",
            Stage::RankTables => "rank_tables",
            Stage::Gate => "gate",
            Stage::FormatSchema => "format_schema",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Explain => "explain",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge taken after `validate`. `attempt` is the 1-based attempt that was
/// just validated, so at most `max_retries + 1` attempts are ever made.
pub fn next_after_validate(passed: bool, attempt: usize, max_retries: usize) -> Stage {
    if passed || attempt > max_retries {
        Stage::Explain
    } else {
        Stage::Generate
    }
}

// ---------------------------------------------------------------------------
// PipelineResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub query: String,
    /// Winning SQL, or the best access-safe candidate after exhaustion.
    pub sql: Option<String>,
    pub passed: bool,
    pub hard_stopped: bool,
    pub reason: Option<String>,
    pub attempts: usize,
    pub selected: Option<CandidateValidation>,
    /// Every attempt's validations, disqualified candidates included.
    pub audit: Vec<AttemptRecord>,
    /// Empty on a hard stop; ranked names may include unapproved tables.
    pub ranked_tables: Vec<ScoredTable>,
    pub gated_tables: Vec<String>,
    pub explanation: Option<String>,
    pub safety_report: Option<String>,
    pub optimization_hints: Option<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    fn from_state(run_id: &str, state: &PipelineState) -> Self {
        Self {
            run_id: run_id.to_string(),
            query: state.query.clone(),
            sql: None,
            passed: false,
            hard_stopped: false,
            reason: None,
            attempts: state.attempt,
            selected: None,
            audit: state.history.clone(),
            ranked_tables: state.ranked.clone(),
            gated_tables: state.gated.iter().map(|t| t.name.clone()).collect(),
            explanation: None,
            safety_report: None,
            optimization_hints: None,
            duration_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    collaborators: Collaborators,
    config: PipelineConfig,
    ranker: TableRanker,
    generator: CandidateGenerator,
    arbiter: CandidateArbiter,
    explainer: Explainer,
    events: EventEmitter,
}

impl Controller {
    /// Validates `config`. Generation and validation calls are wrapped in a
    /// [`RetryingGenerator`] when `config.llm_retries > 0`.
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let wrap = |inner: Arc<dyn TextGenerator>| -> Arc<dyn TextGenerator> {
            if config.llm_retries > 0 {
                Arc::new(RetryingGenerator::new(
                    inner,
                    config.llm_retries,
                    config.backoff.clone(),
                ))
            } else {
                inner
            }
        };
        let generator = wrap(collaborators.generator.clone());
        let validator = wrap(collaborators.validator.clone());

        Ok(Self {
            ranker: TableRanker::from_config(&config),
            generator: CandidateGenerator::new(generator.clone(), config.active_variants()),
            arbiter: CandidateArbiter::new(collaborators.parser.clone(), validator),
            explainer: Explainer::new(generator),
            events: EventEmitter::default(),
            collaborators,
            config,
        })
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline for one question.
    ///
    /// Fatal collaborator failures are `Err`. Gate hard stops and retry
    /// exhaustion are reported through the returned [`PipelineResult`].
    pub async fn run(&self, query: &str) -> Result<PipelineResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        tracing::info!(run_id = %run_id, query = %query, "Pipeline run started");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            query: query.to_string(),
        });

        let mut state = PipelineState::new(query);

        let update = self
            .stage(&run_id, Stage::LoadSchema, 0, self.load_schema())
            .await?;
        state.apply(update);

        // Fan-out; the gate below is the barrier.
        let (access, ranked) = tokio::join!(
            self.stage(&run_id, Stage::AccessCheck, 0, self.access_check(&state)),
            self.stage(&run_id, Stage::RankTables, 0, self.rank_tables(&state)),
        );
        let ranked = ranked?;
        state.apply(access);
        state.apply(ranked);

        let gate = self.stage(&run_id, Stage::Gate, 0, async { self.gate(&state) }).await;
        if !gate.passed {
            let reason = gate.reason.unwrap_or_else(|| "gate blocked".to_string());
            tracing::warn!(run_id = %run_id, reason = %reason, "Gate blocked, stopping run");
            self.events.emit(PipelineEvent::GateBlocked {
                run_id: run_id.clone(),
                reason: reason.clone(),
            });
            let mut result = PipelineResult::from_state(&run_id, &state);
            result.ranked_tables.clear();
            result.hard_stopped = true;
            result.reason = Some(reason);
            return Ok(self.finish(result, started));
        }
        state.apply(StateUpdate {
            gated: Some(gate.tables),
            ..Default::default()
        });

        let update = self
            .stage(&run_id, Stage::FormatSchema, 0, async { self.format(&state) })
            .await;
        state.apply(update);

        // Bounded generate -> validate loop.
        state.apply(StateUpdate {
            attempt: Some(1),
            ..Default::default()
        });
        loop {
            let attempt = state.attempt;
            tracing::info!(
                run_id = %run_id,
                attempt,
                max_attempts = self.config.max_attempts(),
                "Generation attempt"
            );
            let update = self
                .stage(&run_id, Stage::Generate, attempt, self.generate(&state))
                .await?;
            state.apply(update);

            let update = self
                .stage(&run_id, Stage::Validate, attempt, self.validate(&state))
                .await;
            state.apply(update);

            let passed = state.validation.as_ref().is_some_and(|v| v.passed);
            match next_after_validate(passed, attempt, self.config.max_retries) {
                Stage::Generate => {
                    let guidance = state
                        .validation
                        .as_ref()
                        .and_then(|v| v.retry_guidance.clone())
                        .unwrap_or_default();
                    tracing::warn!(run_id = %run_id, attempt, "All candidates failed, retrying");
                    self.events.emit(PipelineEvent::RetryScheduled {
                        run_id: run_id.clone(),
                        attempt: attempt + 1,
                        guidance: guidance.clone(),
                    });
                    state.apply(StateUpdate {
                        retry_guidance: Some(guidance),
                        attempt: Some(attempt + 1),
                        ..Default::default()
                    });
                }
                _ => break,
            }
        }

        let mut result = PipelineResult::from_state(&run_id, &state);
        let selected = match state.validation.as_ref().and_then(|v| v.best()) {
            Some(winner) if state.validation.as_ref().is_some_and(|v| v.passed) => {
                result.passed = true;
                Some(winner.clone())
            }
            _ => {
                let reason = format!("retries exhausted after {} attempts", state.attempt);
                tracing::warn!(run_id = %run_id, attempts = state.attempt, "Retries exhausted, using best-effort candidate");
                self.events.emit(PipelineEvent::RetriesExhausted {
                    run_id: run_id.clone(),
                    attempts: state.attempt,
                });
                result.reason = Some(reason);
                let fallback = state.best_effort().cloned();
                if fallback.is_none() {
                    tracing::warn!(run_id = %run_id, "No access-safe candidate, returning no SQL");
                }
                fallback
            }
        };

        if let Some(ref chosen) = selected {
            self.events.emit(PipelineEvent::CandidateSelected {
                run_id: run_id.clone(),
                variant: chosen.candidate.variant.to_string(),
                total_score: chosen.total_score,
            });
            let explanation = self
                .stage(&run_id, Stage::Explain, state.attempt, self.explain(chosen, &state))
                .await;
            result.sql = Some(chosen.candidate.sql.clone());
            result.explanation = Some(explanation.explanation);
            result.safety_report = Some(explanation.safety_report);
            result.optimization_hints = Some(explanation.optimization_hints);
        }
        result.selected = selected;

        Ok(self.finish(result, started))
    }

    // -- stage handlers ------------------------------------------------------

    async fn load_schema(&self) -> Result<StateUpdate> {
        let tables = self.collaborators.store.introspect().await.map_err(|e| match e {
            QuarryError::SchemaStoreUnavailable(_) => e,
            other => QuarryError::SchemaStoreUnavailable(other.to_string()),
        })?;
        tracing::info!(tables = tables.len(), "Schema loaded");
        Ok(StateUpdate {
            tables: Some(tables),
            ..Default::default()
        })
    }

    async fn access_check(&self, state: &PipelineState) -> StateUpdate {
        match self.collaborators.directory.approved_tables(&state.tables).await {
            Ok(approved) => {
                tracing::info!(approved = approved.len(), "Access check complete");
                StateUpdate {
                    approved: Some(approved),
                    ..Default::default()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Access directory failed");
                StateUpdate {
                    access_error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn rank_tables(&self, state: &PipelineState) -> Result<StateUpdate> {
        let ranked = self
            .ranker
            .rank(&state.tables, &state.query, self.collaborators.embedder.as_ref())
            .await?;
        Ok(StateUpdate {
            ranked: Some(ranked),
            ..Default::default()
        })
    }

    fn gate(&self, state: &PipelineState) -> GateResult {
        apply_gate(
            &state.ranked,
            &state.approved,
            state.access_error.as_deref(),
            self.config.discovery_top_k,
        )
    }

    fn format(&self, state: &PipelineState) -> StateUpdate {
        StateUpdate {
            schema: Some(format_schema(&state.gated)),
            ..Default::default()
        }
    }

    async fn generate(&self, state: &PipelineState) -> Result<StateUpdate> {
        let schema = state
            .schema
            .as_ref()
            .ok_or_else(|| QuarryError::Other("schema not formatted before generation".into()))?;
        let candidates = self
            .generator
            .generate(schema, &state.query, state.retry_guidance.as_deref())
            .await?;
        Ok(StateUpdate {
            candidates: Some(candidates),
            ..Default::default()
        })
    }

    async fn validate(&self, state: &PipelineState) -> StateUpdate {
        let outcome = self.arbiter.validate(&state.candidates, &state.query).await;
        StateUpdate {
            validation: Some(outcome),
            ..Default::default()
        }
    }

    async fn explain(&self, chosen: &CandidateValidation, state: &PipelineState) -> Explanation {
        self.explainer.explain(chosen, &state.query).await
    }

    // -- helpers -------------------------------------------------------------

    /// Await a stage future, emitting start/completion events around it.
    async fn stage<T, F>(&self, run_id: &str, stage: Stage, attempt: usize, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        tracing::debug!(run_id = %run_id, stage = %stage, attempt, "Stage started");
        self.events.emit(PipelineEvent::StageStarted {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            attempt,
        });
        let out = fut.await;
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(run_id = %run_id, stage = %stage, duration_ms, "Stage completed");
        self.events.emit(PipelineEvent::StageCompleted {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            duration_ms,
        });
        out
    }

    fn finish(&self, mut result: PipelineResult, started: Instant) -> PipelineResult {
        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %result.run_id,
            passed = result.passed,
            hard_stopped = result.hard_stopped,
            attempts = result.attempts,
            duration_ms = result.duration_ms,
            "Pipeline run completed"
        );
        self.events.emit(PipelineEvent::RunCompleted {
            run_id: result.run_id.clone(),
            passed: result.passed,
            duration_ms: result.duration_ms,
        });
        result
    }
}
