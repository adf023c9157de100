//! Per-route job constructors.
//!
//! Each constructor validates the token fields its route needs, decodes the
//! body where there is one, and builds the matching [`Job`]. Errors become
//! `400 Invalid request: ...` in the adapter.

use geargate_core::data::decode_first;
use geargate_core::job::*;
use geargate_core::{CreateContainerData, CreateKeysData, ResourceId};

use crate::adapter::{JobRequest, JobRequestError, read_body};

// ── Containers ─────────────────────────────────────────────────

/// PUT /token/:token/container
pub async fn put_container(req: JobRequest) -> Result<Job, JobRequestError> {
    let gear_id = ResourceId::new(req.token.resource_locator())?;
    if req.token.resource_type().is_empty() {
        return Err(JobRequestError::Invalid(
            "A container must have an image identifier",
        ));
    }

    let JobRequest {
        request_id,
        token,
        sink,
        body,
        routes,
        ..
    } = req;
    let bytes = read_body(body, routes.container_body_limit).await?;
    let data: CreateContainerData = decode_first(&bytes)?;

    Ok(Job::CreateContainer(CreateContainerJob {
        request_id,
        gear_id,
        user: token.user,
        image: token.kind,
        data,
        sink,
    }))
}

/// GET /token/:token/container/log
pub async fn get_container_log(req: JobRequest) -> Result<Job, JobRequestError> {
    let gear_id = ResourceId::new(req.token.resource_locator())?;
    Ok(Job::ContainerLog(ContainerLogJob {
        request_id: req.request_id,
        gear_id,
        user: req.token.user,
        sink: req.sink.into_raw(),
    }))
}

/// PUT /token/:token/container/:action
pub async fn put_container_action(req: JobRequest) -> Result<Job, JobRequestError> {
    let gear_id = ResourceId::new(req.token.resource_locator())?;
    let action = req.param("action").to_string();
    let state = |req: JobRequest| ContainerStateJob {
        request_id: req.request_id,
        gear_id,
        user: req.token.user,
        sink: req.sink,
    };
    match action.as_str() {
        "started" => Ok(Job::ContainerStarted(state(req))),
        "stopped" => Ok(Job::ContainerStopped(state(req))),
        _ => Err(JobRequestError::Invalid(
            "You must provide a valid action for this container to take",
        )),
    }
}

// ── Repositories & keys ────────────────────────────────────────

/// PUT /token/:token/repository
pub async fn put_repository(req: JobRequest) -> Result<Job, JobRequestError> {
    let repo_id = ResourceId::new(req.token.resource_locator())?;
    Ok(Job::CreateRepository(CreateRepositoryJob {
        request_id: req.request_id,
        repo_id,
        user: req.token.user,
        clone_source: req.routes.clone_source.clone(),
        image: req.token.kind,
        sink: req.sink,
    }))
}

/// PUT /token/:token/keys
pub async fn put_keys(req: JobRequest) -> Result<Job, JobRequestError> {
    let limit = req.routes.keys_body_limit;
    let bytes = read_body(req.body, limit).await?;
    let data: CreateKeysData = decode_first(&bytes)?;
    data.check()?;

    Ok(Job::PutKeys(PutKeysJob {
        request_id: req.request_id,
        user: req.token.user,
        data,
        sink: req.sink,
    }))
}

// ── Images & content ───────────────────────────────────────────

/// PUT /token/:token/build-image
pub async fn put_build_image(req: JobRequest) -> Result<Job, JobRequestError> {
    if req.token.resource_locator().is_empty() {
        return Err(JobRequestError::Invalid(
            "You must specify the application source to build",
        ));
    }
    if req.token.resource_type().is_empty() {
        return Err(JobRequestError::Invalid("You must specify a base image"));
    }

    let token = req.token;
    Ok(Job::BuildImage(BuildImageJob {
        request_id: req.request_id,
        source: token.locator,
        base_image: token.kind,
        tag: token.user,
        sink: req.sink,
    }))
}

/// GET /token/:token/content and GET /token/:token/content/*
pub async fn get_content(req: JobRequest) -> Result<Job, JobRequestError> {
    if req.token.resource_locator().is_empty() {
        return Err(JobRequestError::Invalid(
            "You must specify the location of the content you want to access",
        ));
    }
    if req.token.resource_type().is_empty() {
        return Err(JobRequestError::Invalid(
            "You must specify the type of the content you want to access",
        ));
    }

    let sub_path = req.param("path").to_string();
    let token = req.token;
    Ok(Job::GetContent(ContentJob {
        request_id: req.request_id,
        content_type: token.kind,
        locator: token.locator,
        sub_path,
        sink: req.sink.into_raw(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::body::Body;
    use geargate_core::sink::{SinkReceiver, response_channel};
    use geargate_core::{PortPair, Token, ValidationError};

    use crate::RouteConfig;

    fn token(user: &str, locator: &str, kind: &str) -> Token {
        Token {
            user: user.into(),
            locator: locator.into(),
            kind: kind.into(),
            ..Token::default()
        }
    }

    fn request(token: Token, params: &[(&str, &str)], body: &str) -> (JobRequest, SinkReceiver) {
        let (sink, rx) = response_channel();
        let req = JobRequest {
            request_id: token.request_id("test").unwrap(),
            token,
            sink,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: Body::from(body.to_string()),
            routes: Arc::new(RouteConfig {
                clone_source: "ccoleman/githost".into(),
                keys_body_limit: 100 * 1024,
                container_body_limit: 64,
            }),
        };
        (req, rx)
    }

    #[tokio::test]
    async fn container_with_empty_body_has_no_ports() {
        let (req, _rx) = request(token("u", "c1", "img-x"), &[], "");
        let Job::CreateContainer(job) = put_container(req).await.unwrap() else {
            panic!("expected create-container");
        };
        assert_eq!(job.gear_id.as_str(), "c1");
        assert_eq!(job.user, "u");
        assert_eq!(job.image, "img-x");
        assert!(job.data.ports.is_empty());
    }

    #[tokio::test]
    async fn container_ports_are_decoded() {
        let body = r#"{"ports":[{"internal":80,"external":8080}]}"#;
        let (req, _rx) = request(token("u", "c1", "img"), &[], body);
        let Job::CreateContainer(job) = put_container(req).await.unwrap() else {
            panic!("expected create-container");
        };
        assert_eq!(
            job.data.ports,
            vec![PortPair {
                internal: 80,
                external: 8080
            }]
        );
    }

    #[tokio::test]
    async fn container_requires_image() {
        let (req, _rx) = request(token("u", "c1", ""), &[], "{}");
        let err = put_container(req).await.unwrap_err();
        assert_eq!(err.to_string(), "A container must have an image identifier");
    }

    #[tokio::test]
    async fn container_requires_valid_gear_id() {
        let (req, _rx) = request(token("u", "not a gear", "img"), &[], "{}");
        assert!(matches!(
            put_container(req).await,
            Err(JobRequestError::Identifier(_))
        ));
    }

    #[tokio::test]
    async fn container_rejects_malformed_json() {
        let (req, _rx) = request(token("u", "c1", "img"), &[], "{\"ports\":");
        assert!(matches!(
            put_container(req).await,
            Err(JobRequestError::Body(_))
        ));
    }

    #[tokio::test]
    async fn container_body_over_limit_fails() {
        let body = format!("{{\"ports\":[]}}{}", " ".repeat(64));
        let (req, _rx) = request(token("u", "c1", "img"), &[], &body);
        assert!(matches!(
            put_container(req).await,
            Err(JobRequestError::BodyTooLarge(64))
        ));
    }

    #[tokio::test]
    async fn log_job_gets_raw_sink() {
        let (req, _rx) = request(token("u", "c1", ""), &[], "");
        let job = get_container_log(req).await.unwrap();
        assert!(matches!(job, Job::ContainerLog(_)));
        assert!(job.is_streaming());
    }

    #[tokio::test]
    async fn container_actions() {
        let (req, _rx) = request(token("u", "c1", ""), &[("action", "started")], "");
        assert!(matches!(
            put_container_action(req).await.unwrap(),
            Job::ContainerStarted(_)
        ));

        let (req, _rx) = request(token("u", "c1", ""), &[("action", "stopped")], "");
        assert!(matches!(
            put_container_action(req).await.unwrap(),
            Job::ContainerStopped(_)
        ));

        for action in ["paused", "log", ""] {
            let (req, _rx) = request(token("u", "c1", ""), &[("action", action)], "");
            let err = put_container_action(req).await.unwrap_err();
            assert_eq!(
                err.to_string(),
                "You must provide a valid action for this container to take"
            );
        }
    }

    #[tokio::test]
    async fn repository_uses_configured_clone_source() {
        let (req, _rx) = request(token("u", "r1", "base"), &[], "");
        let Job::CreateRepository(job) = put_repository(req).await.unwrap() else {
            panic!("expected create-repository");
        };
        assert_eq!(job.repo_id.as_str(), "r1");
        assert_eq!(job.clone_source, "ccoleman/githost");
        assert_eq!(job.image, "base");
    }

    #[tokio::test]
    async fn keys_are_validated() {
        let (req, _rx) = request(token("u", "", ""), &[], "{}");
        assert!(matches!(
            put_keys(req).await,
            Err(JobRequestError::Validation(ValidationError::NoKeys))
        ));

        let body = r#"{"keys":[{"type":"ssh-rsa","value":"AAAA"}],"containers":[{"id":"c1"}]}"#;
        let (req, _rx) = request(token("u", "", ""), &[], body);
        let Job::PutKeys(job) = put_keys(req).await.unwrap() else {
            panic!("expected put-keys");
        };
        assert_eq!(job.data.keys.len(), 1);
        assert_eq!(job.user, "u");
    }

    #[tokio::test]
    async fn keys_body_over_limit_fails() {
        let body = " ".repeat(100 * 1024 + 1);
        let (req, _rx) = request(token("u", "", ""), &[], &body);
        assert!(matches!(
            put_keys(req).await,
            Err(JobRequestError::BodyTooLarge(102_400))
        ));
    }

    #[tokio::test]
    async fn build_image_uses_user_as_tag() {
        let (req, _rx) = request(token("u", "git://src", "base"), &[], "");
        let Job::BuildImage(job) = put_build_image(req).await.unwrap() else {
            panic!("expected build-image");
        };
        assert_eq!(job.source, "git://src");
        assert_eq!(job.base_image, "base");
        assert_eq!(job.tag, "u");
    }

    #[tokio::test]
    async fn build_image_requires_source_and_base() {
        let (req, _rx) = request(token("u", "", "base"), &[], "");
        assert_eq!(
            put_build_image(req).await.unwrap_err().to_string(),
            "You must specify the application source to build"
        );
        let (req, _rx) = request(token("u", "src", ""), &[], "");
        assert_eq!(
            put_build_image(req).await.unwrap_err().to_string(),
            "You must specify a base image"
        );
    }

    #[tokio::test]
    async fn content_passes_sub_path() {
        let (req, _rx) = request(token("u", "a/b", "text"), &[("path", "readme.md")], "");
        let Job::GetContent(job) = get_content(req).await.unwrap() else {
            panic!("expected get-content");
        };
        assert_eq!(job.content_type, "text");
        assert_eq!(job.locator, "a/b");
        assert_eq!(job.sub_path, "readme.md");
    }

    #[tokio::test]
    async fn content_without_wildcard_has_empty_sub_path() {
        let (req, _rx) = request(token("u", "a/b", "text"), &[], "");
        let Job::GetContent(job) = get_content(req).await.unwrap() else {
            panic!("expected get-content");
        };
        assert_eq!(job.sub_path, "");
    }

    #[tokio::test]
    async fn content_requires_locator_and_type() {
        let (req, _rx) = request(token("u", "", "text"), &[], "");
        assert!(get_content(req).await.is_err());
        let (req, _rx) = request(token("u", "a/b", ""), &[], "");
        assert!(get_content(req).await.is_err());
    }
}
