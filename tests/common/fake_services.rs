//! Scripted in-process stand-ins for the four remote services.
//!
//! One [`FakeServices`] value implements every client trait over shared
//! state, so tests can script failures and inspect calls across services.

use async_trait::async_trait;
use job_coordinator::clients::{
    ApplicationState, ClientResult, MachineClient, RemoteMachine, RemoteSerializedSuite,
    ResultsClient, ResultsJobCreation, SourcesClient, WorkerClient, WorkerComponentStatus,
    WorkerJobRequest,
};
use job_coordinator::models::{
    JobId, MachineActionFailure, MachineStateCategory, ResultsJobMetaState, ResultsJobState,
    SerializedSuiteState, WorkerComponentName,
};
use job_coordinator::RemoteClients;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

pub const AUTH_TOKEN: &str = "auth-token";
pub const RESULTS_TOKEN: &str = "results-token";
pub const SERIALIZED_SUITE_ID: &str = "serialized-suite-1";
pub const SUITE_SOURCE: &str = "suite-source";
pub const MACHINE_ID: &str = "machine-1";
pub const MACHINE_IP: &str = "10.0.0.7";

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<&'static str>,
    pub failures: HashMap<&'static str, VecDeque<anyhow::Error>>,
    pub suite_outcome: SerializedSuiteState,
    pub machine_action_failure: Option<MachineActionFailure>,
    pub machine_polls_until_active: u32,
    pub worker_polls_until_end: u32,
    pub machine_polls: u32,
    pub worker_polls: u32,
    pub machine_deleted: bool,
    pub results_ended: bool,
    pub worker_requests: Vec<(String, WorkerJobRequest)>,
    /// Credential sent with each authenticated call, in call order
    pub tokens: Vec<(&'static str, String)>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            suite_outcome: SerializedSuiteState::Prepared,
            machine_action_failure: None,
            machine_polls_until_active: 1,
            worker_polls_until_end: 2,
            machine_polls: 0,
            worker_polls: 0,
            machine_deleted: false,
            results_ended: false,
            worker_requests: Vec::new(),
            tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeServices {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> RemoteClients {
        RemoteClients {
            results: Arc::new(self.clone()),
            sources: Arc::new(self.clone()),
            machines: Arc::new(self.clone()),
            workers: Arc::new(self.clone()),
        }
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: impl Into<anyhow::Error>) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error.into());
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    pub fn worker_requests(&self) -> Vec<(String, WorkerJobRequest)> {
        self.state.lock().worker_requests.clone()
    }

    pub fn fail_suite_preparation(&self) {
        self.state.lock().suite_outcome = SerializedSuiteState::Failed;
    }

    pub fn end_results_job(&self) {
        self.state.lock().results_ended = true;
    }

    pub fn report_machine_action_failure(&self, failure: MachineActionFailure) {
        self.state.lock().machine_action_failure = Some(failure);
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Distinct credentials `operation` was called with
    pub fn tokens_sent_to(&self, operation: &str) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .state
            .lock()
            .tokens
            .iter()
            .filter(|(called, _)| *called == operation)
            .map(|(_, token)| token.clone())
            .collect();
        tokens.dedup();
        tokens
    }

    fn authenticated_call(&self, operation: &'static str, auth_token: &str) -> ClientResult<()> {
        self.state
            .lock()
            .tokens
            .push((operation, auth_token.to_string()));
        self.call(operation)
    }

    fn call(&self, operation: &'static str) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.calls.push(operation);
        match state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn suite(&self, state: SerializedSuiteState) -> RemoteSerializedSuite {
        let failed = state == SerializedSuiteState::Failed;
        RemoteSerializedSuite {
            id: SERIALIZED_SUITE_ID.to_string(),
            state,
            failure_reason: failed.then(|| "compilation_failed".to_string()),
            failure_message: failed.then(|| "suite does not compile".to_string()),
        }
    }
}

fn machine(
    state: &str,
    category: MachineStateCategory,
    ips: &[&str],
    has_end_state: bool,
    action_failure: Option<MachineActionFailure>,
) -> RemoteMachine {
    RemoteMachine {
        id: MACHINE_ID.to_string(),
        state: state.to_string(),
        state_category: category,
        ip_addresses: ips.iter().map(|ip| ip.to_string()).collect(),
        action_failure,
        has_end_state,
    }
}

#[async_trait]
impl ResultsClient for FakeServices {
    async fn create_job(
        &self,
        auth_token: &str,
        _job_id: &JobId,
    ) -> ClientResult<ResultsJobCreation> {
        self.authenticated_call("results.create_job", auth_token)?;
        Ok(ResultsJobCreation {
            token: RESULTS_TOKEN.to_string(),
        })
    }

    async fn get_job_state(
        &self,
        auth_token: &str,
        _job_id: &JobId,
    ) -> ClientResult<ResultsJobState> {
        self.authenticated_call("results.get_job_state", auth_token)?;
        let ended = self.state.lock().results_ended;
        Ok(if ended {
            ResultsJobState {
                state: "ended".to_string(),
                end_state: Some("passed".to_string()),
                meta_state: ResultsJobMetaState {
                    ended: true,
                    succeeded: true,
                },
            }
        } else {
            ResultsJobState {
                state: "running".to_string(),
                end_state: None,
                meta_state: ResultsJobMetaState::default(),
            }
        })
    }
}

#[async_trait]
impl SourcesClient for FakeServices {
    async fn create_serialized_suite(
        &self,
        auth_token: &str,
        _job_id: &JobId,
        _suite_id: &str,
        _parameters: &BTreeMap<String, String>,
    ) -> ClientResult<RemoteSerializedSuite> {
        self.authenticated_call("sources.create_serialized_suite", auth_token)?;
        Ok(self.suite(SerializedSuiteState::Preparing))
    }

    async fn read_serialized_suite(
        &self,
        auth_token: &str,
        _serialized_suite_id: &str,
    ) -> ClientResult<String> {
        self.authenticated_call("sources.read_serialized_suite", auth_token)?;
        Ok(SUITE_SOURCE.to_string())
    }

    async fn get_serialized_suite(
        &self,
        auth_token: &str,
        _serialized_suite_id: &str,
    ) -> ClientResult<RemoteSerializedSuite> {
        self.authenticated_call("sources.get_serialized_suite", auth_token)?;
        let outcome = self.state.lock().suite_outcome;
        Ok(self.suite(outcome))
    }
}

#[async_trait]
impl MachineClient for FakeServices {
    async fn create_machine(
        &self,
        auth_token: &str,
        _job_id: &JobId,
    ) -> ClientResult<RemoteMachine> {
        self.authenticated_call("machines.create_machine", auth_token)?;
        Ok(machine("requested", MachineStateCategory::Finding, &[], false, None))
    }

    async fn get_machine(
        &self,
        auth_token: &str,
        _machine_id: &str,
    ) -> ClientResult<RemoteMachine> {
        self.authenticated_call("machines.get_machine", auth_token)?;
        let mut state = self.state.lock();
        if state.machine_deleted {
            return Ok(machine("terminated", MachineStateCategory::End, &[MACHINE_IP], true, None));
        }
        if let Some(failure) = state.machine_action_failure.clone() {
            return Ok(machine("finding", MachineStateCategory::Finding, &[], false, Some(failure)));
        }

        state.machine_polls += 1;
        if state.machine_polls > state.machine_polls_until_active {
            Ok(machine("running", MachineStateCategory::Active, &[MACHINE_IP], false, None))
        } else {
            Ok(machine("booting", MachineStateCategory::PreActive, &[], false, None))
        }
    }

    async fn delete_machine(
        &self,
        auth_token: &str,
        _machine_id: &str,
    ) -> ClientResult<RemoteMachine> {
        self.authenticated_call("machines.delete_machine", auth_token)?;
        self.state.lock().machine_deleted = true;
        Ok(machine("terminating", MachineStateCategory::Ending, &[MACHINE_IP], false, None))
    }
}

#[async_trait]
impl WorkerClient for FakeServices {
    async fn create_job(&self, ip_address: &str, request: &WorkerJobRequest) -> ClientResult<()> {
        self.call("workers.create_job")?;
        self.state
            .lock()
            .worker_requests
            .push((ip_address.to_string(), request.clone()));
        Ok(())
    }

    async fn get_application_state(&self, _ip_address: &str) -> ClientResult<ApplicationState> {
        self.call("workers.get_application_state")?;
        let mut state = self.state.lock();
        state.worker_polls += 1;
        let finished = state.worker_polls >= state.worker_polls_until_end;
        if finished {
            // Worker delivered its last event; the results service sees the job end
            state.results_ended = true;
        }

        let status = |value: &str| WorkerComponentStatus {
            state: value.to_string(),
            is_end_state: finished,
        };
        let mut components = BTreeMap::new();
        components.insert(WorkerComponentName::Compilation, status("succeeded"));
        components.insert(
            WorkerComponentName::Execution,
            status(if finished { "succeeded" } else { "running" }),
        );
        components.insert(
            WorkerComponentName::EventDelivery,
            status(if finished { "succeeded" } else { "running" }),
        );

        Ok(ApplicationState {
            state: if finished { "finished" } else { "running" }.to_string(),
            is_end_state: finished,
            components,
        })
    }
}
