use super::job::JobId;
use super::ComponentEntity;
use serde::{Deserialize, Serialize};

/// Coarse state reported alongside the results service's own job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultsJobMetaState {
    pub ended: bool,
    pub succeeded: bool,
}

/// State of a job as reported by the results service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsJobState {
    pub state: String,
    pub end_state: Option<String>,
    #[serde(default)]
    pub meta_state: ResultsJobMetaState,
}

impl ResultsJobState {
    pub fn has_ended(&self) -> bool {
        self.end_state.is_some() || self.meta_state.ended
    }
}

/// Results-service job owned by one coordinator job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsJob {
    pub job_id: JobId,
    /// Token the worker uses to deliver events to the results service
    pub token: String,
    pub state: Option<String>,
    pub end_state: Option<String>,
    #[serde(default)]
    pub meta_state: ResultsJobMetaState,
}

impl ResultsJob {
    pub fn new(job_id: JobId, token: impl Into<String>) -> Self {
        Self {
            job_id,
            token: token.into(),
            state: None,
            end_state: None,
            meta_state: ResultsJobMetaState::default(),
        }
    }

    pub fn apply_state(&mut self, state: &ResultsJobState) {
        self.state = Some(state.state.clone());
        self.end_state = state.end_state.clone();
        self.meta_state = state.meta_state;
    }
}

impl ComponentEntity for ResultsJob {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn has_end_state(&self) -> bool {
        self.end_state.is_some() || self.meta_state.ended
    }
}
