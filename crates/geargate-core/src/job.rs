//! Job descriptors.
//!
//! A [`Job`] is built by the HTTP layer and handed to a dispatcher, which
//! owns it from then on. Every descriptor carries the request identifier
//! and the sink through which the job answers the client.

use std::fmt;

use crate::data::{CreateContainerData, CreateKeysData};
use crate::identifier::ResourceId;
use crate::request_id::RequestId;
use crate::sink::{RawResponseSink, ResponseSink};

/// Create and start a gear from an image.
#[derive(Debug)]
pub struct CreateContainerJob {
    pub request_id: RequestId,
    pub gear_id: ResourceId,
    pub user: String,
    pub image: String,
    pub data: CreateContainerData,
    pub sink: ResponseSink,
}

/// Stream a gear's log into the response body.
#[derive(Debug)]
pub struct ContainerLogJob {
    pub request_id: RequestId,
    pub gear_id: ResourceId,
    pub user: String,
    pub sink: RawResponseSink,
}

/// Install SSH keys for gears and repositories.
#[derive(Debug)]
pub struct PutKeysJob {
    pub request_id: RequestId,
    pub user: String,
    pub data: CreateKeysData,
    pub sink: ResponseSink,
}

/// Create a git repository cloned from `clone_source`.
#[derive(Debug)]
pub struct CreateRepositoryJob {
    pub request_id: RequestId,
    pub repo_id: ResourceId,
    pub user: String,
    pub clone_source: String,
    pub image: String,
    pub sink: ResponseSink,
}

/// Move a gear to the started or stopped state.
#[derive(Debug)]
pub struct ContainerStateJob {
    pub request_id: RequestId,
    pub gear_id: ResourceId,
    pub user: String,
    pub sink: ResponseSink,
}

/// Build an image from application source on top of a base image.
#[derive(Debug)]
pub struct BuildImageJob {
    pub request_id: RequestId,
    pub source: String,
    pub base_image: String,
    pub tag: String,
    pub sink: ResponseSink,
}

/// Stream stored content into the response body.
#[derive(Debug)]
pub struct ContentJob {
    pub request_id: RequestId,
    pub content_type: String,
    pub locator: String,
    pub sub_path: String,
    pub sink: RawResponseSink,
}

/// The closed set of jobs the gateway can submit.
#[derive(Debug)]
pub enum Job {
    CreateContainer(CreateContainerJob),
    ContainerLog(ContainerLogJob),
    PutKeys(PutKeysJob),
    CreateRepository(CreateRepositoryJob),
    ContainerStarted(ContainerStateJob),
    ContainerStopped(ContainerStateJob),
    BuildImage(BuildImageJob),
    GetContent(ContentJob),
}

/// Tag of a [`Job`] variant, for logging and routing inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    CreateContainer,
    ContainerLog,
    PutKeys,
    CreateRepository,
    ContainerStarted,
    ContainerStopped,
    BuildImage,
    GetContent,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CreateContainer => "create-container",
            JobKind::ContainerLog => "container-log",
            JobKind::PutKeys => "put-keys",
            JobKind::CreateRepository => "create-repository",
            JobKind::ContainerStarted => "container-started",
            JobKind::ContainerStopped => "container-stopped",
            JobKind::BuildImage => "build-image",
            JobKind::GetContent => "get-content",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::CreateContainer(_) => JobKind::CreateContainer,
            Job::ContainerLog(_) => JobKind::ContainerLog,
            Job::PutKeys(_) => JobKind::PutKeys,
            Job::CreateRepository(_) => JobKind::CreateRepository,
            Job::ContainerStarted(_) => JobKind::ContainerStarted,
            Job::ContainerStopped(_) => JobKind::ContainerStopped,
            Job::BuildImage(_) => JobKind::BuildImage,
            Job::GetContent(_) => JobKind::GetContent,
        }
    }

    /// The idempotency key the dispatcher deduplicates on.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Job::CreateContainer(job) => &job.request_id,
            Job::ContainerLog(job) => &job.request_id,
            Job::PutKeys(job) => &job.request_id,
            Job::CreateRepository(job) => &job.request_id,
            Job::ContainerStarted(job) | Job::ContainerStopped(job) => &job.request_id,
            Job::BuildImage(job) => &job.request_id,
            Job::GetContent(job) => &job.request_id,
        }
    }

    /// Whether the job writes its output as a byte stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Job::ContainerLog(_) | Job::GetContent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::response_channel;

    fn rid() -> RequestId {
        RequestId::derive(&["u"])
    }

    #[test]
    fn kind_and_request_id() {
        let (sink, _rx) = response_channel();
        let job = Job::ContainerStopped(ContainerStateJob {
            request_id: rid(),
            gear_id: ResourceId::new("c1").unwrap(),
            user: "u".into(),
            sink,
        });
        assert_eq!(job.kind(), JobKind::ContainerStopped);
        assert_eq!(job.kind().to_string(), "container-stopped");
        assert_eq!(job.request_id(), &rid());
        assert!(!job.is_streaming());
    }

    #[test]
    fn content_jobs_stream() {
        let (sink, _rx) = response_channel();
        let job = Job::GetContent(ContentJob {
            request_id: rid(),
            content_type: "text".into(),
            locator: "a/b".into(),
            sub_path: String::new(),
            sink: sink.into_raw(),
        });
        assert!(job.is_streaming());
        assert_eq!(job.kind().as_str(), "get-content");
    }
}
