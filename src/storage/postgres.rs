//! PostgreSQL repositories.
//!
//! Runtime-checked `sqlx` queries against the schema in `migrations/`.
//! Row structs mirror the tables; conversions into the domain models reject
//! values that do not parse instead of silently defaulting them.

use super::{
    ComponentRepository, JobRepository, RemoteRequestFailureRepository, RemoteRequestRepository,
    StorageError, StorageResult, WorkerComponentStateRepository,
};
use crate::models::{
    ComponentRequestState, FailureRecord, Job, JobId, Machine, MachineActionFailure,
    RemoteRequest, RemoteRequestCriteria, RemoteRequestEntity, RemoteRequestFailure,
    RemoteRequestKey, RemoteRequestType, ResultsJob, ResultsJobMetaState, SerializedSuite,
    WorkerComponentState, WorkerState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn invalid<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::InvalidData(e.to_string())
}

fn map_insert_error(e: sqlx::Error, key: &RemoteRequestKey) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict(format!("remote request {key} already exists"))
        }
        _ => StorageError::Database(e),
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    suite_id: String,
    maximum_duration_in_seconds: i32,
    request_states: Json<BTreeMap<RemoteRequestEntity, ComponentRequestState>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id.parse().map_err(invalid)?,
            user_id: row.user_id,
            suite_id: row.suite_id,
            maximum_duration_in_seconds: u32::try_from(row.maximum_duration_in_seconds)
                .map_err(invalid)?,
            created_at: row.created_at,
            request_states: row.request_states.0,
        })
    }
}

#[async_trait]
impl JobRepository for PostgresStorage {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, user_id, suite_id, maximum_duration_in_seconds, request_states, created_at
             FROM job WHERE id = $1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn save(&self, job: &Job) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO job
                (id, user_id, suite_id, maximum_duration_in_seconds, request_states, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET request_states = EXCLUDED.request_states",
        )
        .bind(job.id.as_str())
        .bind(&job.user_id)
        .bind(&job.suite_id)
        .bind(i32::try_from(job.maximum_duration_in_seconds).map_err(invalid)?)
        .bind(Json(&job.request_states))
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM job WHERE id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_request_state(
        &self,
        job_id: &JobId,
        entity: RemoteRequestEntity,
        state: ComponentRequestState,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE job
             SET request_states = jsonb_set(request_states, ARRAY[$2], to_jsonb($3::text))
             WHERE id = $1",
        )
        .bind(job_id.as_str())
        .bind(entity.as_str())
        .bind(state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct RemoteRequestRow {
    job_id: String,
    #[sqlx(rename = "type")]
    request_type: String,
    request_index: i32,
    state: String,
    failure_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RemoteRequestRow> for RemoteRequest {
    type Error = StorageError;

    fn try_from(row: RemoteRequestRow) -> Result<Self, Self::Error> {
        Ok(RemoteRequest {
            job_id: row.job_id.parse().map_err(invalid)?,
            request_type: row.request_type.parse().map_err(invalid)?,
            index: u32::try_from(row.request_index).map_err(invalid)?,
            state: row.state.parse().map_err(invalid)?,
            failure_id: row.failure_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const REMOTE_REQUEST_COLUMNS: &str =
    "job_id, type, request_index, state, failure_id, created_at, updated_at";

#[async_trait]
impl RemoteRequestRepository for PostgresStorage {
    async fn insert(&self, request: &RemoteRequest) -> StorageResult<()> {
        let key = request.key();
        sqlx::query(&format!(
            "INSERT INTO remote_request ({REMOTE_REQUEST_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(request.job_id.as_str())
        .bind(request.request_type.as_str())
        .bind(i32::try_from(request.index).map_err(invalid)?)
        .bind(request.state.as_str())
        .bind(request.failure_id.as_deref())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &key))?;
        Ok(())
    }

    async fn save(&self, request: &RemoteRequest) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT INTO remote_request ({REMOTE_REQUEST_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (job_id, type, request_index)
             DO UPDATE SET state = EXCLUDED.state, failure_id = EXCLUDED.failure_id,
                           updated_at = EXCLUDED.updated_at"
        ))
        .bind(request.job_id.as_str())
        .bind(request.request_type.as_str())
        .bind(i32::try_from(request.index).map_err(invalid)?)
        .bind(request.state.as_str())
        .bind(request.failure_id.as_deref())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, key: &RemoteRequestKey) -> StorageResult<Option<RemoteRequest>> {
        let row = sqlx::query_as::<_, RemoteRequestRow>(&format!(
            "SELECT {REMOTE_REQUEST_COLUMNS} FROM remote_request
             WHERE job_id = $1 AND type = $2 AND request_index = $3"
        ))
        .bind(key.job_id.as_str())
        .bind(key.request_type.as_str())
        .bind(i32::try_from(key.index).map_err(invalid)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RemoteRequest::try_from).transpose()
    }

    async fn find_newest(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<RemoteRequest>> {
        let row = sqlx::query_as::<_, RemoteRequestRow>(&format!(
            "SELECT {REMOTE_REQUEST_COLUMNS} FROM remote_request
             WHERE job_id = $1 AND type = $2
             ORDER BY request_index DESC LIMIT 1"
        ))
        .bind(job_id.as_str())
        .bind(request_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RemoteRequest::try_from).transpose()
    }

    async fn largest_index(
        &self,
        job_id: &JobId,
        request_type: RemoteRequestType,
    ) -> StorageResult<Option<u32>> {
        let largest: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(request_index) FROM remote_request WHERE job_id = $1 AND type = $2",
        )
        .bind(job_id.as_str())
        .bind(request_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        largest
            .map(|index| u32::try_from(index).map_err(invalid))
            .transpose()
    }

    async fn count(&self, criteria: &RemoteRequestCriteria) -> StorageResult<u64> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM remote_request WHERE TRUE");

        if let Some(job_id) = &criteria.job_id {
            builder.push(" AND job_id = ").push_bind(job_id.as_str().to_string());
        }
        if let Some(request_type) = criteria.request_type {
            builder.push(" AND type = ").push_bind(request_type.as_str());
        }
        if !criteria.states.is_empty() {
            let states: Vec<String> = criteria.states.iter().map(|s| s.to_string()).collect();
            builder.push(" AND state = ANY(").push_bind(states).push(")");
        }

        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(invalid)
    }

    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<RemoteRequest>> {
        let rows = sqlx::query_as::<_, RemoteRequestRow>(&format!(
            "SELECT {REMOTE_REQUEST_COLUMNS} FROM remote_request
             WHERE job_id = $1 ORDER BY type, request_index"
        ))
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut requests = rows
            .into_iter()
            .map(RemoteRequest::try_from)
            .collect::<StorageResult<Vec<_>>>()?;
        // type order in SQL is lexical; keep the same order as the other backend
        requests.sort_by(|a, b| {
            a.request_type
                .cmp(&b.request_type)
                .then(a.index.cmp(&b.index))
        });
        Ok(requests)
    }

    async fn remove(&self, key: &RemoteRequestKey) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM remote_request WHERE job_id = $1 AND type = $2 AND request_index = $3",
        )
        .bind(key.job_id.as_str())
        .bind(key.request_type.as_str())
        .bind(i32::try_from(key.index).map_err(invalid)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_referencing_failure(&self, failure_id: &str) -> StorageResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM remote_request WHERE failure_id = $1")
                .bind(failure_id)
                .fetch_one(&self.pool)
                .await?;
        u64::try_from(count).map_err(invalid)
    }
}

#[derive(Debug, FromRow)]
struct FailureRow {
    id: String,
    #[sqlx(rename = "type")]
    failure_type: String,
    code: i32,
    message: Option<String>,
}

impl TryFrom<FailureRow> for RemoteRequestFailure {
    type Error = StorageError;

    fn try_from(row: FailureRow) -> Result<Self, Self::Error> {
        Ok(RemoteRequestFailure {
            id: row.id,
            failure_type: row.failure_type.parse().map_err(invalid)?,
            code: row.code,
            message: row.message,
        })
    }
}

#[async_trait]
impl RemoteRequestFailureRepository for PostgresStorage {
    async fn find_or_create(&self, record: &FailureRecord) -> StorageResult<RemoteRequestFailure> {
        // the no-op update makes RETURNING yield the existing row on conflict
        let row = sqlx::query_as::<_, FailureRow>(
            "INSERT INTO remote_request_failure (id, type, code, message) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
             RETURNING id, type, code, message",
        )
        .bind(record.content_id())
        .bind(record.failure_type.as_str())
        .bind(record.code)
        .bind(record.message.as_deref())
        .fetch_one(&self.pool)
        .await?;

        RemoteRequestFailure::try_from(row)
    }

    async fn find(&self, id: &str) -> StorageResult<Option<RemoteRequestFailure>> {
        let row = sqlx::query_as::<_, FailureRow>(
            "SELECT id, type, code, message FROM remote_request_failure WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RemoteRequestFailure::try_from).transpose()
    }

    async fn remove(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM remote_request_failure WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct ResultsJobRow {
    job_id: String,
    token: String,
    state: Option<String>,
    end_state: Option<String>,
    meta_state: Json<ResultsJobMetaState>,
}

#[async_trait]
impl ComponentRepository<ResultsJob> for PostgresStorage {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<ResultsJob>> {
        let row = sqlx::query_as::<_, ResultsJobRow>(
            "SELECT job_id, token, state, end_state, meta_state FROM results_job WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ResultsJob {
                job_id: row.job_id.parse().map_err(invalid)?,
                token: row.token,
                state: row.state,
                end_state: row.end_state,
                meta_state: row.meta_state.0,
            })
        })
        .transpose()
    }

    async fn save(&self, entity: &ResultsJob) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO results_job (job_id, token, state, end_state, meta_state)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (job_id) DO UPDATE SET token = EXCLUDED.token, state = EXCLUDED.state,
                 end_state = EXCLUDED.end_state, meta_state = EXCLUDED.meta_state",
        )
        .bind(entity.job_id.as_str())
        .bind(&entity.token)
        .bind(entity.state.as_deref())
        .bind(entity.end_state.as_deref())
        .bind(Json(entity.meta_state))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM results_job WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct SerializedSuiteRow {
    job_id: String,
    serialized_suite_id: String,
    state: String,
    failure_reason: Option<String>,
    failure_message: Option<String>,
}

#[async_trait]
impl ComponentRepository<SerializedSuite> for PostgresStorage {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<SerializedSuite>> {
        let row = sqlx::query_as::<_, SerializedSuiteRow>(
            "SELECT job_id, serialized_suite_id, state, failure_reason, failure_message
             FROM serialized_suite WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SerializedSuite {
                job_id: row.job_id.parse().map_err(invalid)?,
                serialized_suite_id: row.serialized_suite_id,
                state: row.state.parse().map_err(invalid)?,
                failure_reason: row.failure_reason,
                failure_message: row.failure_message,
            })
        })
        .transpose()
    }

    async fn save(&self, entity: &SerializedSuite) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO serialized_suite
                (job_id, serialized_suite_id, state, failure_reason, failure_message)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (job_id) DO UPDATE SET serialized_suite_id = EXCLUDED.serialized_suite_id,
                 state = EXCLUDED.state, failure_reason = EXCLUDED.failure_reason,
                 failure_message = EXCLUDED.failure_message",
        )
        .bind(entity.job_id.as_str())
        .bind(&entity.serialized_suite_id)
        .bind(entity.state.as_str())
        .bind(entity.failure_reason.as_deref())
        .bind(entity.failure_message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM serialized_suite WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct MachineRow {
    job_id: String,
    id: String,
    state: String,
    state_category: String,
    ip_addresses: Json<Vec<String>>,
    action_failure: Option<Json<MachineActionFailure>>,
    has_end_state: bool,
}

#[async_trait]
impl ComponentRepository<Machine> for PostgresStorage {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<Machine>> {
        let row = sqlx::query_as::<_, MachineRow>(
            "SELECT job_id, id, state, state_category, ip_addresses, action_failure, has_end_state
             FROM machine WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Machine {
                job_id: row.job_id.parse().map_err(invalid)?,
                id: row.id,
                state: row.state,
                state_category: row.state_category.parse().map_err(invalid)?,
                ip_addresses: row.ip_addresses.0,
                action_failure: row.action_failure.map(|failure| failure.0),
                has_end_state: row.has_end_state,
            })
        })
        .transpose()
    }

    async fn save(&self, entity: &Machine) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO machine
                (job_id, id, state, state_category, ip_addresses, action_failure, has_end_state)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (job_id) DO UPDATE SET id = EXCLUDED.id, state = EXCLUDED.state,
                 state_category = EXCLUDED.state_category, ip_addresses = EXCLUDED.ip_addresses,
                 action_failure = EXCLUDED.action_failure, has_end_state = EXCLUDED.has_end_state",
        )
        .bind(entity.job_id.as_str())
        .bind(&entity.id)
        .bind(&entity.state)
        .bind(entity.state_category.as_str())
        .bind(Json(&entity.ip_addresses))
        .bind(entity.action_failure.as_ref().map(Json))
        .bind(entity.has_end_state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM machine WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct WorkerStateRow {
    job_id: String,
    state: String,
    is_end_state: bool,
}

#[async_trait]
impl ComponentRepository<WorkerState> for PostgresStorage {
    async fn find(&self, job_id: &JobId) -> StorageResult<Option<WorkerState>> {
        let row = sqlx::query_as::<_, WorkerStateRow>(
            "SELECT job_id, state, is_end_state FROM worker_state WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(WorkerState {
                job_id: row.job_id.parse().map_err(invalid)?,
                state: row.state,
                is_end_state: row.is_end_state,
            })
        })
        .transpose()
    }

    async fn save(&self, entity: &WorkerState) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO worker_state (job_id, state, is_end_state) VALUES ($1, $2, $3)
             ON CONFLICT (job_id)
             DO UPDATE SET state = EXCLUDED.state, is_end_state = EXCLUDED.is_end_state",
        )
        .bind(entity.job_id.as_str())
        .bind(&entity.state)
        .bind(entity.is_end_state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM worker_state WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct WorkerComponentStateRow {
    job_id: String,
    component_name: String,
    state: String,
    is_end_state: bool,
}

#[async_trait]
impl WorkerComponentStateRepository for PostgresStorage {
    async fn find_for_job(&self, job_id: &JobId) -> StorageResult<Vec<WorkerComponentState>> {
        let rows = sqlx::query_as::<_, WorkerComponentStateRow>(
            "SELECT job_id, component_name, state, is_end_state
             FROM worker_component_state WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut states = rows
            .into_iter()
            .map(|row| {
                Ok(WorkerComponentState {
                    job_id: row.job_id.parse().map_err(invalid)?,
                    component_name: row.component_name.parse().map_err(invalid)?,
                    state: row.state,
                    is_end_state: row.is_end_state,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        states.sort_by_key(|state| state.component_name);
        Ok(states)
    }

    async fn save(&self, state: &WorkerComponentState) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO worker_component_state (job_id, component_name, state, is_end_state)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (job_id, component_name)
             DO UPDATE SET state = EXCLUDED.state, is_end_state = EXCLUDED.is_end_state",
        )
        .bind(state.job_id.as_str())
        .bind(state.component_name.as_str())
        .bind(&state.state)
        .bind(state.is_end_state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_for_job(&self, job_id: &JobId) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM worker_component_state WHERE job_id = $1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
