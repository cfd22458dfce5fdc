//! HTTP submission of mutating requests
//!
//! [`HttpSubmitter`] delivers over reqwest against the configured API base
//! URL. [`ScriptedSubmitter`] answers from per-endpoint scripts and records
//! every request, for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::action::{HttpMethod, NewAction, PendingAction};
use crate::error::DeliveryError;

/// User agent sent with every request
const USER_AGENT: &str = concat!("ridelink/", env!("CARGO_PKG_VERSION"));

/// One request to the server
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub bearer_token: Option<String>,
}

impl SubmitRequest {
    pub fn for_pending(action: &PendingAction, bearer_token: Option<String>) -> Self {
        Self {
            endpoint: action.endpoint.clone(),
            method: action.method,
            body: action.body.clone(),
            bearer_token,
        }
    }

    pub fn for_new(action: &NewAction, bearer_token: Option<String>) -> Self {
        Self {
            endpoint: action.endpoint.clone(),
            method: action.method,
            body: action.body.clone(),
            bearer_token,
        }
    }
}

/// Performs a single request
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), DeliveryError>;
}

/// Submits over HTTP
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: Client,
    base_url: Option<String>,
}

impl HttpSubmitter {
    /// Create a submitter; `base_url` may be absent if every endpoint is absolute
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        })
    }

    /// Resolve an endpoint against the base URL
    pub fn url(&self, endpoint: &str) -> Result<String, DeliveryError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!("{}/{}", base, endpoint.trim_start_matches('/'))),
            None => Err(DeliveryError::NotConfigured {
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl ActionSubmitter for HttpSubmitter {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), DeliveryError> {
        let url = self.url(&request.endpoint)?;
        let mut builder = self.client.request(method(request.method), &url);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {}", request.method, url);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout {
                    endpoint: request.endpoint.clone(),
                }
            } else {
                DeliveryError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(DeliveryError::Unauthorized {
                endpoint: request.endpoint.clone(),
            });
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                method: request.method.to_string(),
                endpoint: request.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<Result<(), DeliveryError>>>,
    fallback: HashMap<String, DeliveryError>,
    requests: Vec<SubmitRequest>,
    delay: Option<Duration>,
}

/// Answers requests from scripted outcomes
///
/// Each endpoint first consumes its scripted outcomes in order, then fails
/// with its fallback error if one is set, and succeeds otherwise.
#[derive(Debug, Default)]
pub struct ScriptedSubmitter {
    script: Mutex<Script>,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for `endpoint`
    pub fn script(
        &self,
        endpoint: &str,
        outcomes: impl IntoIterator<Item = Result<(), DeliveryError>>,
    ) {
        self.lock()
            .outcomes
            .entry(endpoint.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Fail every unscripted request to `endpoint` with `error`
    pub fn fail_always(&self, endpoint: &str, error: DeliveryError) {
        self.lock().fallback.insert(endpoint.to_string(), error);
    }

    /// Take this long to answer each request
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Every request seen, in order
    pub fn requests(&self) -> Vec<SubmitRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, endpoint: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    fn answer(&self, request: &SubmitRequest) -> (Result<(), DeliveryError>, Option<Duration>) {
        let mut script = self.lock();
        script.requests.push(request.clone());

        let scripted = script
            .outcomes
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match script.fallback.get(&request.endpoint) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };
        (outcome, script.delay)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ActionSubmitter for ScriptedSubmitter {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), DeliveryError> {
        let (outcome, delay) = self.answer(request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
