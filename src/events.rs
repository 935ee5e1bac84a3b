// src/events.rs
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AggregateMetrics, RunStatus};

/// Progress notifications published while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        name: String,
        total_combinations: usize,
    },
    ResultAppended {
        run_id: String,
        index: usize,
        scenario_id: String,
        agent_id: Option<String>,
        passed: usize,
        failed: usize,
        progress: u8,
    },
    CombinationSkipped {
        run_id: String,
        index: usize,
        scenario_id: String,
        agent_id: Option<String>,
        reason: String,
        progress: u8,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        aggregate: AggregateMetrics,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::ResultAppended { run_id, .. }
            | RunEvent::CombinationSkipped { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => run_id,
        }
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            RunEvent::ResultAppended { progress, .. }
            | RunEvent::CombinationSkipped { progress, .. } => Some(*progress),
            _ => None,
        }
    }
}

pub const EVENT_BUFFER: usize = 256;

pub fn channel() -> (broadcast::Sender<RunEvent>, broadcast::Receiver<RunEvent>) {
    broadcast::channel(EVENT_BUFFER)
}
