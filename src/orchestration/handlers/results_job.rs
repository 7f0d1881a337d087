use super::{HandlerContext, HandlerOutcome, MessageHandler, PreflightResult};
use crate::events::DomainEventKind;
use crate::messaging::{MessageKind, RemoteRequestMessage};
use crate::models::{RemoteRequestEntity, ResultsJob};
use crate::orchestration::errors::{HandlerError, HandlerResult};
use async_trait::async_trait;

pub struct ResultsJobHandler {
    context: HandlerContext,
}

impl ResultsJobHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }

    async fn create(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let created = self
            .context
            .clients
            .results
            .create_job(&message.authentication_token, &message.job_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        let results_job = ResultsJob::new(message.job_id.clone(), created.token);
        self.context.stores.results_jobs.save(&results_job).await?;

        self.context
            .complete(message, vec![DomainEventKind::ResultsJobCreated])
            .await
    }

    async fn retrieve(
        &self,
        message: &RemoteRequestMessage,
        results_job: Option<ResultsJob>,
    ) -> HandlerResult<HandlerOutcome> {
        let mut results_job =
            results_job.ok_or_else(|| HandlerError::entity_not_found(message, "results job"))?;

        let state = self
            .context
            .clients
            .results
            .get_job_state(&message.authentication_token, &message.job_id)
            .await
            .map_err(|e| HandlerError::remote(message, e))?;

        results_job.apply_state(&state);
        self.context.stores.results_jobs.save(&results_job).await?;

        self.context
            .complete(message, vec![DomainEventKind::ResultsJobStateRetrieved { state }])
            .await
    }
}

#[async_trait]
impl MessageHandler for ResultsJobHandler {
    fn handler_name(&self) -> &'static str {
        "results_job"
    }

    fn entity(&self) -> RemoteRequestEntity {
        RemoteRequestEntity::ResultsJob
    }

    async fn handle(&self, message: &RemoteRequestMessage) -> HandlerResult<HandlerOutcome> {
        let preflight = match self.context.preflight(message).await? {
            PreflightResult::Proceed(preflight) => preflight,
            PreflightResult::Skip(state) => return Ok(HandlerOutcome::Skipped { state }),
        };

        match &message.kind {
            MessageKind::ResultsJobCreate => self.create(message).await,
            MessageKind::ResultsJobRetrieve => {
                self.retrieve(message, preflight.snapshot.results_job).await
            }
            _ => Ok(HandlerOutcome::Skipped { state: None }),
        }
    }
}
