//! Pending action types

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// HTTP method of a mutating request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported method: {}", other)),
        }
    }
}

/// A mutating request to submit now or queue for later
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    /// Application-level action type, e.g. `cancel-ride`
    pub kind: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    /// Overrides the queue's default retry budget
    pub max_retries: Option<u32>,
}

impl NewAction {
    pub fn new(kind: impl Into<String>, endpoint: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            kind: kind.into(),
            endpoint: endpoint.into(),
            method,
            body: None,
            max_retries: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A queued request awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingAction {
    pub fn from_new(action: NewAction, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: action.kind,
            endpoint: action.endpoint,
            method: action.method,
            body: action.body,
            created_at: now,
            retry_count: 0,
            max_retries: action.max_retries.unwrap_or(default_max_retries),
        }
    }

    /// Whether another failure keeps the action queued
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
