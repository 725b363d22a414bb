//! Media pipeline: hand edits to the transcoder, poll until it settles, then
//! publish the result through the video host and attach it to the catalog item.
//!
//! A job only becomes `published` after the host returned a video id. Timeouts
//! and transcoder failures end in `failed`, never in a guessed success.
//!
//! Uploading is claimed with a compare-and-swap into `publishing`, so the
//! poller and a status request racing on the same completed job upload once.
//! A claim older than [`PUBLISH_LEASE_SECS`] is treated as abandoned.

use std::time::Duration;

use crate::collaborators::TranscodeStatus;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::id::EntityType;
use crate::models::{CreateProcessingJob, EditOperation, ProcessingJob, ProcessingStatus};

const POLL_BATCH: i64 = 50;

/// How long a `publishing` claim is honored before another caller may retake it.
pub const PUBLISH_LEASE_SECS: i64 = 300;

fn validate_operations(operations: &[EditOperation]) -> Result<()> {
    for op in operations {
        let problem = match op {
            EditOperation::Cut { start, end } if !(start.is_finite() && end.is_finite()) => {
                Some("cut bounds must be finite")
            }
            EditOperation::Cut { start, end } if *start < 0.0 || end <= start => {
                Some("cut needs 0 <= start < end")
            }
            EditOperation::Concat { sources } if sources.is_empty() => {
                Some("concat needs at least one source")
            }
            EditOperation::Preview { duration } if !(duration.is_finite() && *duration > 0.0) => {
                Some("preview duration must be positive")
            }
            _ => None,
        };
        if let Some(problem) = problem {
            return Err(AppError::BadRequest(problem.into()));
        }
    }
    Ok(())
}

/// Submit `input` for `item_id` and record the queued job.
pub async fn start_processing(state: &AppState, item_id: &str, input: &CreateProcessingJob) -> Result<ProcessingJob> {
    let source_ref = input.source_ref.trim();
    if source_ref.is_empty() {
        return Err(AppError::BadRequest("source_ref is required".into()));
    }
    validate_operations(&input.operations)?;

    {
        let conn = state.db.get()?;
        queries::get_catalog_item(&conn, item_id)?.or_not_found(msg::ITEM_NOT_FOUND)?;
    }

    let external_job_id = state.transcoder.submit(source_ref, &input.operations).await?;

    let now = queries::now();
    let job = ProcessingJob {
        id: EntityType::ProcessingJob.gen_id(),
        item_id: item_id.to_string(),
        external_job_id,
        source_ref: source_ref.to_string(),
        operations: input.operations.clone(),
        status: ProcessingStatus::Queued,
        result_ref: None,
        external_video_id: None,
        error: None,
        created_at: now,
        updated_at: now,
    };
    let conn = state.db.get()?;
    queries::insert_processing_job(&conn, &job)?;
    tracing::info!(
        "Processing job {} queued for item {} (external {})",
        job.id,
        item_id,
        job.external_job_id
    );
    Ok(job)
}

/// Advance one job as far as the collaborators allow right now.
pub async fn refresh_job(state: &AppState, job: ProcessingJob, now: i64) -> Result<ProcessingJob> {
    if job.status.is_terminal() {
        return Ok(job);
    }
    let timed_out = now - job.created_at > state.processing_timeout_secs;

    if job.status == ProcessingStatus::Publishing && now - job.updated_at < PUBLISH_LEASE_SECS {
        return Ok(job);
    }

    let transcoded = matches!(
        job.status,
        ProcessingStatus::Completed | ProcessingStatus::Publishing
    );
    let (result_ref, mut job) = if transcoded {
        match job.result_ref.clone() {
            Some(r) => (r, job),
            None => return fail(state, &job, "completed without a result reference"),
        }
    } else {
        let poll = match state.transcoder.poll(&job.external_job_id).await {
            Ok(poll) => poll,
            Err(e) if timed_out => return fail(state, &job, &format!("timed out: {}", e)),
            Err(e) => {
                tracing::warn!("Polling job {} failed: {}", job.id, e);
                return Ok(job);
            }
        };

        match poll.status {
            TranscodeStatus::Queued | TranscodeStatus::Running if timed_out => {
                return fail(state, &job, "timed out waiting for the transcoder");
            }
            TranscodeStatus::Queued => return Ok(job),
            TranscodeStatus::Running => {
                if job.status == ProcessingStatus::Running {
                    return Ok(job);
                }
                return update(state, &job.id, ProcessingStatus::Running, None, None, None);
            }
            TranscodeStatus::Failed => {
                let reason = poll.error.unwrap_or_else(|| "transcoder reported failure".into());
                return fail(state, &job, &reason);
            }
            TranscodeStatus::Completed => {
                let Some(result_ref) = poll.result_ref else {
                    return fail(state, &job, "completed without a result reference");
                };
                let job = update(
                    state,
                    &job.id,
                    ProcessingStatus::Completed,
                    Some(&result_ref),
                    None,
                    None,
                )?;
                (result_ref, job)
            }
        }
    };

    let title = {
        let conn = state.db.get()?;
        if !queries::claim_processing_job(&conn, &job.id, job.status, job.updated_at, now)? {
            tracing::debug!("Job {} already claimed for publishing", job.id);
            return queries::get_processing_job(&conn, &job.id)?.or_not_found(msg::JOB_NOT_FOUND);
        }
        queries::get_catalog_item(&conn, &job.item_id)?
            .map(|item| item.title)
            .unwrap_or_else(|| job.item_id.clone())
    };

    let hosted = match state.video_host.upload(&result_ref, &title).await {
        Ok(hosted) => hosted,
        Err(e) if timed_out || !e.is_transient() => {
            return fail(state, &job, &format!("upload failed: {}", e));
        }
        Err(e) => {
            tracing::warn!("Upload for job {} failed, will retry: {}", job.id, e);
            return update(state, &job.id, ProcessingStatus::Completed, None, None, None);
        }
    };

    let conn = state.db.get()?;
    queries::set_catalog_item_video(&conn, &job.item_id, &hosted.video_id, &hosted.url)?;
    job = queries::update_processing_job(
        &conn,
        &job.id,
        ProcessingStatus::Published,
        None,
        Some(&hosted.video_id),
        None,
    )?
    .or_not_found(msg::JOB_NOT_FOUND)?;
    tracing::info!(
        "Published job {} as video {} on item {}",
        job.id,
        hosted.video_id,
        job.item_id
    );
    Ok(job)
}

/// Drive every open job once. Returns how many reached a terminal state.
pub async fn poll_open_jobs(state: &AppState) -> Result<usize> {
    let jobs = {
        let conn = state.db.get()?;
        queries::list_open_processing_jobs(&conn, POLL_BATCH)?
    };
    let mut finished = 0;
    for job in jobs {
        let id = job.id.clone();
        match refresh_job(state, job, queries::now()).await {
            Ok(job) if job.status.is_terminal() => finished += 1,
            Ok(_) => {}
            Err(e) => tracing::warn!("Refreshing job {} failed: {}", id, e),
        }
    }
    Ok(finished)
}

pub fn spawn_media_poller(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            match poll_open_jobs(&state).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("{} processing jobs finished", n),
                Err(e) => tracing::warn!("Media poll failed: {}", e),
            }
        }
    });

    tracing::info!("Media poller started (runs every {}s)", interval_secs);
}

fn update(
    state: &AppState,
    id: &str,
    status: ProcessingStatus,
    result_ref: Option<&str>,
    external_video_id: Option<&str>,
    error: Option<&str>,
) -> Result<ProcessingJob> {
    let conn = state.db.get()?;
    queries::update_processing_job(&conn, id, status, result_ref, external_video_id, error)?
        .or_not_found(msg::JOB_NOT_FOUND)
}

fn fail(state: &AppState, job: &ProcessingJob, reason: &str) -> Result<ProcessingJob> {
    tracing::warn!("Processing job {} failed: {}", job.id, reason);
    update(state, &job.id, ProcessingStatus::Failed, None, None, Some(reason))
}
