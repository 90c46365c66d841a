//! Background HTTP publisher.
//!
//! One worker task owns the HTTP client and sends one event at a time. While
//! a request is outstanding further publishes are refused, the same contract
//! a device's single background publish slot has.

use crate::{TransportError, TransportResult};
use publish_queue_core::{CompletionNotifier, Publisher, QueuedEvent};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const EVENTS_PATH: &str = "v1/events";

/// Cloud publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudPublisherConfig {
    /// Base URL of the cloud API. Events are posted to `{endpoint}/v1/events`.
    pub endpoint: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Request timeout in seconds. A timeout is reported as a failed publish.
    pub timeout_secs: u64,
}

impl Default for CloudPublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            auth_token: None,
            timeout_secs: 30,
        }
    }
}

/// Request body for a single event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishEventRequest<'a> {
    name: &'a str,
    data: &'a str,
    no_ack: bool,
    with_ack: bool,
}

struct Job {
    event: QueuedEvent,
    notifier: CompletionNotifier,
}

/// Publisher posting events to the cloud API from a tokio task.
pub struct CloudPublisher {
    jobs: mpsc::Sender<Job>,
    busy: Arc<AtomicBool>,
    background: bool,
}

impl CloudPublisher {
    /// Start the worker on the given runtime.
    ///
    /// Completions are only reported as background-delivered on a
    /// multi-thread runtime.
    pub fn spawn(config: CloudPublisherConfig, handle: &Handle) -> TransportResult<Self> {
        let url = events_url(&config.endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (jobs, rx) = mpsc::channel(1);
        let busy = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            client,
            url,
            auth_token: config.auth_token,
            busy: Arc::clone(&busy),
        };
        handle.spawn(worker.run(rx));

        let background = matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread);
        info!(endpoint = %config.endpoint, background, "Cloud publisher started");

        Ok(Self {
            jobs,
            busy,
            background,
        })
    }

    /// Start the worker on the runtime of the calling context.
    pub fn spawn_current(config: CloudPublisherConfig) -> TransportResult<Self> {
        let handle = Handle::try_current().map_err(|e| TransportError::Config(e.to_string()))?;
        Self::spawn(config, &handle)
    }

    /// Whether a publish is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Publisher for CloudPublisher {
    fn publish(&self, event: QueuedEvent, notifier: CompletionNotifier) -> bool {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!(name = %event.name, "Cloud publisher busy");
            notifier.cancel();
            return false;
        }

        match self.jobs.try_send(Job { event, notifier }) {
            Ok(()) => true,
            Err(e) => {
                self.busy.store(false, Ordering::SeqCst);
                warn!("Cloud publisher worker unavailable");
                let job = match e {
                    mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
                };
                job.notifier.cancel();
                false
            }
        }
    }

    fn background_delivery(&self) -> bool {
        self.background
    }
}

struct Worker {
    client: Client,
    url: Url,
    auth_token: Option<String>,
    busy: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::Receiver<Job>) {
        while let Some(Job { event, notifier }) = jobs.recv().await {
            let attempt = notifier.attempt();
            let result = self.send(&event).await;
            match &result {
                Ok(()) => debug!(name = %event.name, attempt, "Cloud publish succeeded"),
                Err(e) => warn!(
                    name = %event.name,
                    attempt,
                    error = %e,
                    "Cloud publish failed"
                ),
            }
            self.busy.store(false, Ordering::SeqCst);
            notifier.notify(result.is_ok());
        }
        debug!("Cloud publisher worker stopped");
    }

    async fn send(&self, event: &QueuedEvent) -> TransportResult<()> {
        let body = PublishEventRequest {
            name: &event.name,
            data: &event.payload,
            no_ack: event.flags.no_ack(),
            with_ack: event.flags.with_ack(),
        };

        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Resolve the events URL under `endpoint`, keeping any base path.
fn events_url(endpoint: &str) -> TransportResult<Url> {
    let mut base = Url::parse(endpoint)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(EVENTS_PATH)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_url() {
        assert_eq!(
            events_url("http://localhost:8080").unwrap().as_str(),
            "http://localhost:8080/v1/events"
        );
        assert_eq!(
            events_url("https://api.example.com/").unwrap().as_str(),
            "https://api.example.com/v1/events"
        );
        assert_eq!(
            events_url("https://api.example.com/device").unwrap().as_str(),
            "https://api.example.com/device/v1/events"
        );
    }

    #[test]
    fn test_events_url_invalid() {
        assert!(matches!(
            events_url("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let body = PublishEventRequest {
            name: "testEvent",
            data: "1",
            no_ack: false,
            with_ack: true,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"name":"testEvent","data":"1","noAck":false,"withAck":true}"#
        );
    }

    #[test]
    fn test_config_default() {
        let config = CloudPublisherConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_spawn_current_outside_runtime() {
        assert!(matches!(
            CloudPublisher::spawn_current(CloudPublisherConfig::default()),
            Err(TransportError::Config(_))
        ));
    }
}
