//! Job, parameter and state statements.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

use jobvault_core::time::{millis_after, to_millis};
use jobvault_core::{Invocation, Job, JobData, JobId, JobParameter, JobState, StateData};

use crate::error::{StorageError, StorageResult, require_non_empty, store_err};
use crate::rows::{JobParameterRow, JobRow, JobStateRow, decode_state_data};

#[instrument(skip(pool, invocation, parameters), fields(parameters = parameters.len()), err)]
pub(super) async fn create_job(
    pool: &SqlitePool,
    invocation: &Invocation,
    parameters: &BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    expire_in: Duration,
) -> StorageResult<JobId> {
    invocation
        .validate()
        .map_err(|e| StorageError::argument(e.to_string()))?;
    for name in parameters.keys() {
        require_non_empty("parameter name", name)?;
    }
    let (invocation_data, arguments) = invocation.encode()?;

    let mut tx = pool.begin().await.map_err(store_err("create_job"))?;

    let row = sqlx::query(
        "INSERT INTO job (invocation_data, arguments, created_at, expire_at) \
         VALUES (?1, ?2, ?3, ?4) RETURNING id",
    )
    .bind(&invocation_data)
    .bind(&arguments)
    .bind(to_millis(created_at))
    .bind(millis_after(created_at, expire_in))
    .fetch_one(&mut *tx)
    .await
    .map_err(store_err("create_job"))?;
    let job_id = JobId::from_i64(row.try_get("id").map_err(store_err("create_job"))?);

    for (name, value) in parameters {
        sqlx::query("INSERT INTO job_parameter (job_id, name, value) VALUES (?1, ?2, ?3)")
            .bind(job_id.as_i64())
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(store_err("create_job_parameters"))?;
    }

    tx.commit().await.map_err(store_err("create_job"))?;
    debug!(%job_id, "job created");
    Ok(job_id)
}

#[instrument(skip(pool), err)]
pub(super) async fn get_job_data(
    pool: &SqlitePool,
    job_id: JobId,
) -> StorageResult<Option<JobData>> {
    let row: Option<JobRow> = sqlx::query_as(
        "SELECT id, invocation_data, arguments, created_at, expire_at, state_id, state_name \
         FROM job WHERE id = ?1",
    )
    .bind(job_id.as_i64())
    .fetch_optional(pool)
    .await
    .map_err(store_err("get_job_data"))?;

    Ok(row.map(|row| job_data(Job::from(row))))
}

fn job_data(job: Job) -> JobData {
    let (invocation, load_error) = match Invocation::decode(&job.invocation_data, &job.arguments) {
        Ok(invocation) => (Some(invocation), None),
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "stored job payload could not be decoded");
            (None, Some(err))
        }
    };

    JobData {
        job: invocation,
        state: job.state_name,
        created_at: job.created_at,
        expire_at: job.expire_at,
        load_error,
    }
}

#[instrument(skip(pool), err)]
pub(super) async fn get_state_data(
    pool: &SqlitePool,
    job_id: JobId,
) -> StorageResult<Option<StateData>> {
    let row = sqlx::query(
        "SELECT s.name, s.reason, s.data FROM job j \
         INNER JOIN state s ON s.id = j.state_id \
         WHERE j.id = ?1",
    )
    .bind(job_id.as_i64())
    .fetch_optional(pool)
    .await
    .map_err(store_err("get_state_data"))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let name: String = row.try_get("name").map_err(store_err("get_state_data"))?;
    let reason: Option<String> = row.try_get("reason").map_err(store_err("get_state_data"))?;
    let data: Option<String> = row.try_get("data").map_err(store_err("get_state_data"))?;

    Ok(Some(StateData {
        name,
        reason,
        data: decode_state_data(data.as_deref())?,
    }))
}

#[instrument(skip(pool, value), err)]
pub(super) async fn set_job_parameter(
    pool: &SqlitePool,
    job_id: JobId,
    name: &str,
    value: Option<&str>,
) -> StorageResult<()> {
    require_non_empty("parameter name", name)?;

    sqlx::query(
        "INSERT INTO job_parameter (job_id, name, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT (job_id, name) DO UPDATE SET value = excluded.value",
    )
    .bind(job_id.as_i64())
    .bind(name)
    .bind(value)
    .execute(pool)
    .await
    .map_err(store_err("set_job_parameter"))?;
    Ok(())
}

#[instrument(skip(pool), err)]
pub(super) async fn get_job_parameter(
    pool: &SqlitePool,
    job_id: JobId,
    name: &str,
) -> StorageResult<Option<String>> {
    require_non_empty("parameter name", name)?;

    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM job_parameter WHERE job_id = ?1 AND name = ?2")
            .bind(job_id.as_i64())
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(store_err("get_job_parameter"))?;
    Ok(value.flatten())
}

pub(super) async fn get_job_parameters(
    pool: &SqlitePool,
    job_id: JobId,
) -> StorageResult<Vec<JobParameter>> {
    let rows: Vec<JobParameterRow> = sqlx::query_as(
        "SELECT job_id, name, value FROM job_parameter WHERE job_id = ?1 ORDER BY name",
    )
    .bind(job_id.as_i64())
    .fetch_all(pool)
    .await
    .map_err(store_err("get_job_parameters"))?;
    Ok(rows.into_iter().map(JobParameter::from).collect())
}

pub(super) async fn get_state_history(
    pool: &SqlitePool,
    job_id: JobId,
) -> StorageResult<Vec<JobState>> {
    let rows: Vec<JobStateRow> = sqlx::query_as(
        "SELECT id, job_id, name, reason, data, created_at FROM state \
         WHERE job_id = ?1 ORDER BY id",
    )
    .bind(job_id.as_i64())
    .fetch_all(pool)
    .await
    .map_err(store_err("get_state_history"))?;
    rows.into_iter().map(JobState::try_from).collect()
}
