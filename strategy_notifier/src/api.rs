use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::NotifierConfig;
use crate::error::{NotifierError, Result};
use crate::utils;

/// Progress payload shared by the live channel and the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default, rename = "currentStep")]
    pub current_step: Option<String>,
}

impl ProgressUpdate {
    pub fn new(progress: u32, current_step: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            current_step: Some(current_step.into()),
        }
    }

    /// Server values are shown as received, clamped to the bar's range.
    pub fn percent(&self) -> Option<u8> {
        self.progress.map(|p| p.min(100) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Progress(ProgressUpdate),
    Complete { strategy_id: String },
}

pub type LiveStream = BoxStream<'static, Result<LiveEvent>>;

/// Job status as reported by `check_strategy_status/{jobId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed { strategy_id: String },
    Failed { error: Option<String> },
    Unknown,
    Running { progress: Option<ProgressUpdate> },
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    strategy_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    progress: Option<u32>,
    #[serde(default, rename = "currentStep")]
    current_step: Option<String>,
}

impl From<JobStatusResponse> for JobStatus {
    fn from(resp: JobStatusResponse) -> Self {
        match resp.status.as_str() {
            "completed" => match resp.strategy_id {
                Some(strategy_id) => JobStatus::Completed { strategy_id },
                None => {
                    warn!("completed job status carried no strategy_id");
                    JobStatus::Unknown
                }
            },
            "error" => JobStatus::Failed { error: resp.error },
            "unknown" => JobStatus::Unknown,
            _ => {
                let progress = (resp.progress.is_some() || resp.current_step.is_some()).then(|| {
                    ProgressUpdate {
                        progress: resp.progress,
                        current_step: resp.current_step,
                    }
                });
                JobStatus::Running { progress }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct StrategyStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CompletePayload {
    strategy_id: String,
}

/// The three remote calls the notifier depends on.
#[async_trait]
pub trait StrategyApi: Send + Sync + 'static {
    /// Opens the server-push progress channel for a job.
    async fn progress_stream(&self, company_id: &str) -> Result<LiveStream>;

    async fn job_status(&self, company_id: &str) -> Result<JobStatus>;

    /// Review status of a produced strategy, e.g. `pending` or `approved`.
    async fn strategy_status(&self, strategy_id: &str) -> Result<String>;
}

pub struct HttpStrategyApi {
    client: Client,
    stream_client: Client,
    base_url: Url,
}

impl HttpStrategyApi {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(config.request_timeout).build()?,
            // The push channel stays open for the whole job, so only the connect is bounded.
            stream_client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = utils::endpoint(&self.base_url, segments)?;
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(NotifierError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl StrategyApi for HttpStrategyApi {
    async fn progress_stream(&self, company_id: &str) -> Result<LiveStream> {
        let url = utils::endpoint(&self.base_url, &["strategy_progress", company_id])?;
        let response = self
            .stream_client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifierError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|item| async move {
                match item {
                    Ok(event) => parse_live_event(&event.event, &event.data),
                    Err(e) => Some(Err(NotifierError::EventStream {
                        message: e.to_string(),
                    })),
                }
            });
        Ok(events.boxed())
    }

    async fn job_status(&self, company_id: &str) -> Result<JobStatus> {
        let resp: JobStatusResponse = self
            .get_json(&["check_strategy_status", company_id])
            .await?;
        Ok(resp.into())
    }

    async fn strategy_status(&self, strategy_id: &str) -> Result<String> {
        let resp: StrategyStatusResponse = self
            .get_json(&["check_strategy_status_by_id", strategy_id])
            .await?;
        Ok(resp.status)
    }
}

/// Malformed payloads are logged and dropped rather than surfaced as errors.
pub(crate) fn parse_live_event(event_type: &str, data: &str) -> Option<Result<LiveEvent>> {
    match event_type {
        "" | "message" => match serde_json::from_str::<ProgressUpdate>(data) {
            Ok(update) => Some(Ok(LiveEvent::Progress(update))),
            Err(e) => {
                warn!(error = %e, data, "dropping malformed progress message");
                None
            }
        },
        "complete" => match serde_json::from_str::<CompletePayload>(data) {
            Ok(payload) => Some(Ok(LiveEvent::Complete {
                strategy_id: payload.strategy_id,
            })),
            Err(e) => {
                warn!(error = %e, data, "dropping malformed completion message");
                None
            }
        },
        other => {
            debug!(event = other, "ignoring unrecognised event type");
            None
        }
    }
}
