//! Client for the local orchestrator API

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http::StatusCode;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, warn};
use url::Url;

use openapi_server::models::{
    ActionResponse, DeploymentStatusResponse, ErrorResponse, InventoryResponse, StartRequest,
};

use crate::errors::OrchestratorError;
use crate::transport::message::ExecutionEvent;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// HTTP client for a running orchestrator
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, OrchestratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, OrchestratorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP request failed: {} - {}", status, body);
            let message = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) if !err.problems.is_empty() => {
                    format!("{}: {}", err.error, err.problems.join("; "))
                }
                Ok(err) => err.error,
                Err(_) => body,
            };
            return Err(match status {
                StatusCode::NOT_FOUND => OrchestratorError::NotFound(message),
                StatusCode::CONFLICT => OrchestratorError::InvalidState(message),
                _ => OrchestratorError::ServerError(format!("{}: {}", status, message)),
            });
        }
        Ok(response.json().await?)
    }

    pub async fn status(&self) -> Result<DeploymentStatusResponse, OrchestratorError> {
        self.get("/deployment").await
    }

    /// Issue a deployment command such as `start` or `retry`
    pub async fn action(
        &self,
        action: &str,
        request: Option<&StartRequest>,
    ) -> Result<ActionResponse, OrchestratorError> {
        self.post(&format!("/deployment/{}", action), request).await
    }

    pub async fn cancel(&self) -> Result<ActionResponse, OrchestratorError> {
        self.post::<_, StartRequest>("/deployment/cancel", None).await
    }

    pub async fn diagnostic(&self) -> Result<ActionResponse, OrchestratorError> {
        self.post::<_, StartRequest>("/deployment/aux/diagnostic", None).await
    }

    pub async fn compensate(&self, job_id: &str) -> Result<ActionResponse, OrchestratorError> {
        self.post::<_, StartRequest>(&format!("/deployment/aux/compensate/{}", job_id), None)
            .await
    }

    pub async fn inventory(&self, mode: &str) -> Result<InventoryResponse, OrchestratorError> {
        self.post::<_, StartRequest>(&format!("/inventory/{}", mode), None).await
    }

    pub async fn export_logs(&self) -> Result<String, OrchestratorError> {
        let url = format!("{}/deployment/logs", self.base_url);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::ServerError(response.status().to_string()));
        }
        Ok(response.text().await?)
    }

    /// Follow a playbook stream until its terminal event.
    ///
    /// Reconnects with backoff when the connection drops; events already
    /// seen are skipped on replay.
    pub async fn watch<F>(
        &self,
        job: &str,
        cooldown: &CooldownOptions,
        max_attempts: u32,
        mut on_event: F,
    ) -> Result<ExecutionEvent, OrchestratorError>
    where
        F: FnMut(&ExecutionEvent),
    {
        let url = stream_url(&self.base_url, job)?;
        let mut next_seq: u64 = 0;
        let mut attempt: u32 = 0;

        loop {
            match connect_async(url.as_str()).await {
                Ok((mut ws_stream, _)) => {
                    attempt = 0;
                    while let Some(message) = ws_stream.next().await {
                        let text = match message {
                            Ok(Message::Text(text)) => text,
                            Ok(Message::Close(_)) => break,
                            Ok(_) => continue,
                            Err(e) => {
                                warn!("Stream error: {}", e);
                                break;
                            }
                        };
                        let event: ExecutionEvent = match serde_json::from_str(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("Ignoring malformed event: {}", e);
                                continue;
                            }
                        };
                        if event.seq < next_seq && !event.is_terminal() {
                            continue;
                        }
                        next_seq = event.seq + 1;
                        on_event(&event);
                        if event.is_terminal() {
                            let _ = ws_stream.close(None).await;
                            return Ok(event);
                        }
                    }
                    let _ = ws_stream.send(Message::Close(None)).await;
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", url, e);
                }
            }

            attempt += 1;
            if attempt > max_attempts {
                return Err(OrchestratorError::TransportError(format!(
                    "stream for {} lost after {} attempts",
                    job, max_attempts
                )));
            }
            let delay = calc_exp_backoff(cooldown, attempt - 1);
            debug!("Reconnecting in {:?}...", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// WebSocket address of a playbook stream
pub fn stream_url(base_url: &str, job: &str) -> Result<Url, OrchestratorError> {
    let mut url = Url::parse(base_url).map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(OrchestratorError::ConfigError("Invalid base URL scheme".to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| OrchestratorError::ConfigError("Failed to set scheme".to_string()))?;
    url.set_path(&format!(
        "{}/ws/playbook/{}",
        url.path().trim_end_matches('/'),
        job.trim_start_matches('/')
    ));

    Ok(url)
}
