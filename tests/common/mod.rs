#![allow(dead_code)]

pub mod fake_services;
pub mod flaky_bus;

pub use fake_services::*;
pub use flaky_bus::FlakyBus;

use job_coordinator::config::{CoordinatorConfig, DispatchConfig};
use job_coordinator::events::PublishedEvent;
use job_coordinator::models::{JobId, RemoteRequest, RemoteRequestType};
use job_coordinator::{JobCoordinator, NewJob, Stores};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound on messages a single drain may process
pub const DRAIN_LIMIT: usize = 5_000;

/// Coordinator config with every delay at zero
pub fn test_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.dispatch = DispatchConfig::uniform(0);
    config.messaging.visibility_timeout_seconds = 1;
    config.messaging.poll_interval_ms = 10;
    config.messaging.event_channel_capacity = 10_000;
    config
}

pub fn new_job() -> NewJob {
    let mut parameters = BTreeMap::new();
    parameters.insert("browser".to_string(), "firefox".to_string());
    NewJob {
        user_id: "user-1".to_string(),
        suite_id: "suite-1".to_string(),
        maximum_duration_in_seconds: 1800,
        parameters,
        authentication_token: AUTH_TOKEN.to_string(),
    }
}

/// In-memory coordinator wired to [`FakeServices`]
pub struct Harness {
    pub coordinator: JobCoordinator,
    pub services: FakeServices,
    pub events: broadcast::Receiver<PublishedEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self::with_services(config, FakeServices::new())
    }

    pub fn with_services(config: CoordinatorConfig, services: FakeServices) -> Self {
        let coordinator = JobCoordinator::in_memory(config, services.clients());
        let events = coordinator.subscribe();
        Self {
            coordinator,
            services,
            events,
        }
    }

    /// Coordinator over in-memory stores that publishes through `bus`
    pub fn with_bus(config: CoordinatorConfig, services: FakeServices, bus: Arc<FlakyBus>) -> Self {
        let coordinator = JobCoordinator::new(config, Stores::in_memory(), bus, services.clients());
        let events = coordinator.subscribe();
        Self {
            coordinator,
            services,
            events,
        }
    }

    pub async fn create_job(&self) -> JobId {
        self.coordinator
            .create_job(new_job())
            .await
            .expect("job should be created")
    }

    /// Process messages until the bus is idle
    pub async fn drain(&self) -> usize {
        let processed = self
            .coordinator
            .drain(DRAIN_LIMIT, Duration::from_millis(20))
            .await
            .expect("drain should not fail");
        assert!(processed < DRAIN_LIMIT, "bus never went idle");
        processed
    }

    /// Process messages one at a time until `done` holds
    pub async fn process_until<F, Fut>(&self, mut done: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..DRAIN_LIMIT {
            if done().await {
                return;
            }
            let processed = self
                .coordinator
                .process_next(Duration::from_millis(20))
                .await
                .expect("processing should not fail");
            assert!(processed, "bus went idle before the condition held");
        }
        panic!("condition never held");
    }

    pub async fn attempts(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> Vec<RemoteRequest> {
        let mut attempts: Vec<RemoteRequest> = self
            .coordinator
            .ledger()
            .find_for_job(job_id)
            .await
            .expect("ledger readable")
            .into_iter()
            .filter(|request| request.request_type == request_type)
            .collect();
        attempts.sort_by_key(|request| request.index);
        attempts
    }

    /// Names of every event published so far
    pub fn event_names(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(published) => names.push(published.name),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return names,
            }
        }
    }
}
