//! Job execution.
//!
//! Workers hand each dequeued job to a [`JobExecutor`]. The executor owns
//! the job, including its response sink, and must have written the full
//! response by the time the returned future resolves.

use std::future::Future;

use geargate_core::job::*;
use geargate_core::sink::SinkError;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde_json::json;
use tracing::debug;

/// Backend that runs jobs.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: Job) -> impl Future<Output = ()> + Send;
}

/// Executor that performs no backend work and answers every job with an
/// acknowledgement describing what would run.
///
/// Used by the standalone daemon when no backend is attached.
#[derive(Debug, Clone, Default)]
pub struct AcknowledgeExecutor;

impl JobExecutor for AcknowledgeExecutor {
    async fn execute(&self, job: Job) {
        let kind = job.kind();
        let request_id = job.request_id().to_string();
        if let Err(e) = acknowledge(job).await {
            debug!(%kind, %request_id, error = %e, "client went away before acknowledgement");
        }
    }
}

async fn acknowledge(job: Job) -> Result<(), SinkError> {
    let kind = job.kind().as_str();
    let request_id = job.request_id().to_string();
    match job {
        Job::CreateContainer(job) => job.sink.json(
            StatusCode::OK,
            &json!({
                "job": kind,
                "request_id": request_id,
                "gear_id": job.gear_id,
                "user": job.user,
                "image": job.image,
                "ports": job.data.ports,
            }),
        ),
        Job::PutKeys(job) => job.sink.json(
            StatusCode::OK,
            &json!({
                "job": kind,
                "request_id": request_id,
                "user": job.user,
                "keys": job.data.keys.len(),
            }),
        ),
        Job::CreateRepository(job) => job.sink.json(
            StatusCode::OK,
            &json!({
                "job": kind,
                "request_id": request_id,
                "repo_id": job.repo_id,
                "clone_source": job.clone_source,
                "image": job.image,
            }),
        ),
        Job::ContainerStarted(job) | Job::ContainerStopped(job) => job.sink.json(
            StatusCode::OK,
            &json!({
                "job": kind,
                "request_id": request_id,
                "gear_id": job.gear_id,
            }),
        ),
        Job::BuildImage(job) => job.sink.json(
            StatusCode::OK,
            &json!({
                "job": kind,
                "request_id": request_id,
                "source": job.source,
                "base_image": job.base_image,
                "tag": job.tag,
            }),
        ),
        Job::ContainerLog(mut job) => {
            job.sink
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            job.sink
                .write(format!("no log backend attached for gear {}\n", job.gear_id))
                .await
        }
        Job::GetContent(mut job) => {
            job.sink
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            job.sink
                .write(format!(
                    "no content backend attached for {} {}/{}\n",
                    job.content_type, job.locator, job.sub_path
                ))
                .await
        }
    }
}
