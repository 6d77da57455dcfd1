//! Per-run pipeline state and the stage update records applied to it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use quarry_types::{
    CandidateValidation, CheckKind, FormattedSchema, ScoredTable, SqlCandidate, Table,
    ValidationOutcome,
};

/// One generate→validate pass, kept for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub results: Vec<CandidateValidation>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_guidance: Option<String>,
}

/// The single mutable record of one run. Only the controller mutates it,
/// through [`PipelineState::apply`].
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub query: String,
    pub tables: Vec<Table>,
    pub approved: HashSet<String>,
    pub access_error: Option<String>,
    pub ranked: Vec<ScoredTable>,
    pub gated: Vec<Table>,
    pub schema: Option<FormattedSchema>,
    pub candidates: Vec<SqlCandidate>,
    pub validation: Option<ValidationOutcome>,
    pub retry_guidance: Option<String>,
    /// 1-based once generation has started.
    pub attempt: usize,
    pub history: Vec<AttemptRecord>,
}

/// Fields a stage may write. Stages write disjoint fields; `approved` merges
/// by set union, everything else replaces.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub tables: Option<Vec<Table>>,
    pub approved: Option<HashSet<String>>,
    pub access_error: Option<String>,
    pub ranked: Option<Vec<ScoredTable>>,
    pub gated: Option<Vec<Table>>,
    pub schema: Option<FormattedSchema>,
    pub candidates: Option<Vec<SqlCandidate>>,
    pub validation: Option<ValidationOutcome>,
    pub retry_guidance: Option<String>,
    pub attempt: Option<usize>,
}

impl PipelineState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(tables) = update.tables {
            self.tables = tables;
        }
        if let Some(approved) = update.approved {
            self.approved.extend(approved);
        }
        if let Some(err) = update.access_error {
            self.access_error = Some(err);
        }
        if let Some(ranked) = update.ranked {
            self.ranked = ranked;
        }
        if let Some(gated) = update.gated {
            self.gated = gated;
        }
        if let Some(schema) = update.schema {
            self.schema = Some(schema);
        }
        if let Some(candidates) = update.candidates {
            self.candidates = candidates;
        }
        if let Some(validation) = update.validation {
            self.history.push(AttemptRecord {
                attempt: self.attempt,
                results: validation.results.clone(),
                passed: validation.passed,
                retry_guidance: validation.retry_guidance.clone(),
            });
            self.validation = Some(validation);
        }
        if let Some(guidance) = update.retry_guidance {
            self.retry_guidance = Some(guidance);
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }
    }

    /// Best candidate over every attempt when none passed: most hard checks
    /// passed, then most checks passed, then highest raw score, then earliest.
    /// Only candidates that passed access safety are eligible; `None` when
    /// every candidate tried to write or touch system tables.
    pub fn best_effort(&self) -> Option<&CandidateValidation> {
        let key = |v: &CandidateValidation| {
            let hard = v.checks.iter().filter(|c| c.kind.is_hard_fail() && c.passed).count();
            let passed = v.checks.iter().filter(|c| c.passed).count();
            let raw: f64 = v.checks.iter().map(|c| c.score).sum();
            (hard, passed, raw)
        };
        let mut best: Option<(&CandidateValidation, (usize, usize, f64))> = None;
        let access_safe = |v: &&CandidateValidation| {
            v.checks
                .iter()
                .any(|c| c.kind == CheckKind::AccessSafety && c.passed)
        };
        for v in self
            .history
            .iter()
            .flat_map(|a| a.results.iter())
            .filter(access_safe)
        {
            let k = key(v);
            let better = match &best {
                None => true,
                Some((_, bk)) => (k.0, k.1) > (bk.0, bk.1) || ((k.0, k.1) == (bk.0, bk.1) && k.2 > bk.2),
            };
            if better {
                best = Some((v, k));
            }
        }
        best.map(|(v, _)| v)
    }
}
