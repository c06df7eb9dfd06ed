//! JSON-over-HTTP adapter for remote quantum services.
//!
//! Every failure is folded into a [`BackendError`] whose
//! [`is_retryable`](BackendError::is_retryable) drives the orchestrator's
//! retry policy.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use quasar_model::{BackendDescriptor, BackendId, CapabilityDescriptor, Gate, JobId};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

use super::{
    BackendResult, ConnectionHandle, JobHandle, JobResult, JobSpec, JobStatus,
    QuantumBackend, ResourceBudget,
};
use crate::error::{BackendError, EngineError, Result};

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub id: String,
    /// Base URL; `/v1/...` paths are appended to it.
    pub endpoint: String,
    pub device: String,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    /// Declared capability, used for validation without contacting the
    /// service.
    pub capability: CapabilityDescriptor,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            id: "remote".to_string(),
            endpoint: "https://localhost".to_string(),
            device: "default".to_string(),
            api_token: None,
            request_timeout_ms: 30_000,
            capability: CapabilityDescriptor {
                max_qubits: 127,
                gate_set: [Gate::H, Gate::X, Gate::Z, Gate::Rz, Gate::Cx, Gate::Measure]
                    .into_iter()
                    .collect::<BTreeSet<_>>(),
                max_concurrent_jobs: 2,
                average_latency_ms: 5_000,
                supports_cancel: true,
            },
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("device", &self.device)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("capability", &self.capability)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    capability: CapabilityDescriptor,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    device: &'a str,
    client_job_id: JobId,
    spec: JobSpec,
    budget: ResourceBudget,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    status: JobStatus,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    partial: Option<serde_json::Value>,
}

pub struct RemoteBackend {
    descriptor: BackendDescriptor,
    endpoint: Url,
    device: String,
    token: Option<Zeroizing<String>>,
    client: Client,
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("id", &self.descriptor.id)
            .field("endpoint", &self.endpoint.as_str())
            .field("device", &self.device)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|err| {
            EngineError::Validation(format!(
                "invalid endpoint `{}`: {err}",
                config.endpoint
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(EngineError::Validation(format!(
                "endpoint `{endpoint}` must be an http(s) URL"
            )));
        }
        if config.capability.max_concurrent_jobs == 0 {
            return Err(EngineError::Validation(format!(
                "backend `{}` declares zero concurrent jobs",
                config.id
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| EngineError::Internal(format!("http client: {err}")))?;

        Ok(Self {
            descriptor: BackendDescriptor {
                id: BackendId::new(config.id)?,
                is_simulated: false,
                capability: config.capability,
            },
            endpoint,
            device: config.device,
            token: config.api_token.map(Zeroizing::new),
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Protocol("endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, cancelling: bool) -> BackendResult<String> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return Ok(body);
        }
        let error = classify_status(status, retry_after, &body, cancelling);
        warn!(
            backend_id = %self.descriptor.id,
            status = status.as_u16(),
            retryable = error.is_retryable(),
            "remote backend returned an error"
        );
        Err(error)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> BackendResult<T> {
    serde_json::from_str(body)
        .map_err(|err| BackendError::Protocol(format!("undecodable response: {err}")))
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_decode() {
        BackendError::Protocol(err.to_string())
    } else {
        BackendError::Transient(err.to_string())
    }
}

/// Maps an HTTP error status to a backend error.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    cancelling: bool,
) -> BackendError {
    let detail = format!("{status}: {}", body.trim());
    match status.as_u16() {
        401 | 403 => BackendError::Authentication(detail),
        400 | 422 => BackendError::MalformedCircuit(detail),
        404 => BackendError::Rejected(detail),
        405 | 501 if cancelling => BackendError::Unsupported(detail),
        429 => BackendError::RateLimited { retry_after },
        408 | 500 | 502 | 503 | 504 => BackendError::Transient(detail),
        _ => BackendError::Rejected(detail),
    }
}

#[async_trait]
impl QuantumBackend for RemoteBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> BackendResult<ConnectionHandle> {
        let url = self.url(&["v1", "device"])?;
        self.send(self.client.get(url).query(&[("name", &self.device)]), false)
            .await?;
        debug!(backend_id = %self.descriptor.id, "connected to remote backend");
        Ok(ConnectionHandle::open(self.descriptor.id.clone()))
    }

    async fn describe(&self, _handle: &ConnectionHandle) -> BackendResult<CapabilityDescriptor> {
        let url = self.url(&["v1", "device"])?;
        let body = self
            .send(self.client.get(url).query(&[("name", &self.device)]), false)
            .await?;
        Ok(decode::<DeviceResponse>(&body)?.capability)
    }

    async fn submit(
        &self,
        _handle: &ConnectionHandle,
        job_id: JobId,
        spec: JobSpec,
        budget: ResourceBudget,
    ) -> BackendResult<JobHandle> {
        let kind = spec.label();
        let url = self.url(&["v1", "jobs"])?;
        let payload = SubmitRequest {
            device: &self.device,
            client_job_id: job_id,
            spec,
            budget,
        };
        let body = self.send(self.client.post(url).json(&payload), false).await?;
        let accepted: SubmitResponse = decode(&body)?;
        debug!(
            backend_id = %self.descriptor.id,
            %job_id,
            external_id = %accepted.job_id,
            kind,
            "remote job accepted"
        );
        Ok(JobHandle::new(job_id, accepted.job_id))
    }

    async fn poll(&self, _handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<JobStatus> {
        let url = self.url(&["v1", "jobs", &job.external_id])?;
        let body = self.send(self.client.get(url), false).await?;
        Ok(decode::<StatusResponse>(&body)?.status)
    }

    async fn fetch_result(
        &self,
        _handle: &ConnectionHandle,
        job: &JobHandle,
    ) -> BackendResult<JobResult> {
        let url = self.url(&["v1", "jobs", &job.external_id, "result"])?;
        let body = self.send(self.client.get(url), false).await?;
        let response: ResultResponse = decode(&body)?;
        match response.status {
            JobStatus::Completed => response.result.ok_or_else(|| {
                BackendError::Protocol("completed job carried no result".into())
            }),
            JobStatus::Failed => {
                if response.partial.is_some() {
                    warn!(
                        job_id = %job.job_id,
                        "discarding partial results of failed remote job"
                    );
                }
                Err(BackendError::JobFailed(
                    response.error.unwrap_or_else(|| "remote job failed".into()),
                ))
            }
            JobStatus::TimedOut => Err(BackendError::JobFailed(
                "remote job exceeded its runtime budget".into(),
            )),
            JobStatus::Queued | JobStatus::Running => Err(BackendError::Rejected(format!(
                "job {} has not finished",
                job.external_id
            ))),
        }
    }

    async fn cancel(&self, _handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<()> {
        if !self.descriptor.capability.supports_cancel {
            return Err(BackendError::Unsupported("cancel".into()));
        }
        let url = self.url(&["v1", "jobs", &job.external_id])?;
        self.send(self.client.delete(url), true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let classify = |code: u16, cancelling| {
            classify_status(StatusCode::from_u16(code).unwrap(), None, "", cancelling)
        };
        assert!(matches!(classify(401, false), BackendError::Authentication(_)));
        assert!(matches!(classify(403, false), BackendError::Authentication(_)));
        assert!(matches!(classify(422, false), BackendError::MalformedCircuit(_)));
        assert!(matches!(classify(404, false), BackendError::Rejected(_)));
        assert!(matches!(classify(501, true), BackendError::Unsupported(_)));
        assert!(matches!(classify(501, false), BackendError::Rejected(_)));
        assert!(classify(503, false).is_retryable());
        assert!(classify(408, false).is_retryable());
        assert!(!classify(401, false).is_retryable());
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            "slow down",
            false,
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.is_retryable());
    }

    #[test]
    fn rejects_non_http_endpoints_and_hides_tokens() {
        let bad = RemoteConfig {
            endpoint: "ftp://quantum.example".into(),
            ..RemoteConfig::default()
        };
        assert!(RemoteBackend::new(bad).is_err());

        let config = RemoteConfig {
            api_token: Some("s3cr3t-token".into()),
            ..RemoteConfig::default()
        };
        assert!(!format!("{config:?}").contains("s3cr3t"));
        let backend = RemoteBackend::new(config).unwrap();
        assert!(!format!("{backend:?}").contains("s3cr3t"));
    }

    #[test]
    fn job_ids_are_path_encoded() {
        let backend = RemoteBackend::new(RemoteConfig {
            endpoint: "http://127.0.0.1:9000/api/".into(),
            ..RemoteConfig::default()
        })
        .unwrap();
        let url = backend.url(&["v1", "jobs", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/api/v1/jobs/a%2Fb");
    }
}
