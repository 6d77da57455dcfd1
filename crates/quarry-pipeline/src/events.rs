//! Run events for observability.
//!
//! The controller publishes [`PipelineEvent`]s on a broadcast channel. A
//! single controller may drive several runs at once, so every event carries
//! its run id and observers filter on [`PipelineEvent::run_id`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        query: String,
    },
    StageStarted {
        run_id: String,
        stage: String,
        attempt: usize,
    },
    StageCompleted {
        run_id: String,
        stage: String,
        duration_ms: u64,
    },
    GateBlocked {
        run_id: String,
        reason: String,
    },
    RetryScheduled {
        run_id: String,
        /// The attempt about to start.
        attempt: usize,
        guidance: String,
    },
    CandidateSelected {
        run_id: String,
        variant: String,
        total_score: f64,
    },
    RetriesExhausted {
        run_id: String,
        attempts: usize,
    },
    RunCompleted {
        run_id: String,
        passed: bool,
        duration_ms: u64,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::GateBlocked { run_id, .. }
            | PipelineEvent::RetryScheduled { run_id, .. }
            | PipelineEvent::CandidateSelected { run_id, .. }
            | PipelineEvent::RetriesExhausted { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. } => run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::StageStarted { .. } => "stage_started",
            PipelineEvent::StageCompleted { .. } => "stage_completed",
            PipelineEvent::GateBlocked { .. } => "gate_blocked",
            PipelineEvent::RetryScheduled { .. } => "retry_scheduled",
            PipelineEvent::CandidateSelected { .. } => "candidate_selected",
            PipelineEvent::RetriesExhausted { .. } => "retries_exhausted",
            PipelineEvent::RunCompleted { .. } => "run_completed",
        }
    }

    /// True for the last event a run ever emits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::RunCompleted { .. })
    }
}

#[derive(Clone)]
pub struct EventEmitter {
    sender: Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Slow subscribers that fall more than `capacity` events behind see
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Dropped when nobody is subscribed.
    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(run_id = %event.run_id(), event = event.kind(), "Pipeline event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
