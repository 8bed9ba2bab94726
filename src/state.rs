use crate::models::PlanSource;
use crate::orchestrator::GenerationState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PlanState {
    Idle,
    Generating {
        attempt: u32,
    },
    Ready {
        source: PlanSource,
        generated_at: Option<DateTime<Utc>>,
    },
    Failed {
        message: String,
    },
}

impl PlanState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_generating(&self) -> bool {
        matches!(self, Self::Generating { .. })
    }
}

/// Where each user's plan request stands, queried instead of mirrored.
#[derive(Clone, Default)]
pub struct PlanStateRegistry {
    states: Arc<Mutex<HashMap<String, PlanState>>>,
}

impl PlanStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> PlanState {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(user_id).cloned())
            .unwrap_or(PlanState::Idle)
    }

    pub fn set(&self, user_id: &str, state: PlanState) {
        match self.states.lock() {
            Ok(mut states) => {
                states.insert(user_id.to_string(), state);
            }
            Err(_) => tracing::error!(user_id, "plan state registry mutex poisoned"),
        }
    }

    /// Mirror an orchestrator transition. Terminal outcomes are recorded by
    /// the caller, which knows the source and final error.
    pub fn observe(&self, user_id: &str, transition: &GenerationState) {
        match transition {
            GenerationState::Generating { attempt } => self.set(user_id, PlanState::Generating { attempt: *attempt }),
            GenerationState::Succeeded { .. } | GenerationState::Failed { .. } => {}
        }
    }

    pub fn clear(&self, user_id: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(user_id);
        }
    }
}
