//! HTTP hook job: asks a pipeline service to do a unit of work.
//!
//! Feed ingestion, article analysis, and social lookups live behind their own
//! service endpoints; this job only sends the request and maps the response
//! status to success or failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::error::JobError;
use crate::scheduler::Job;

/// Maximum response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug)]
pub struct HttpJob {
    name: String,
    description: Option<String>,
    dependencies: Vec<String>,
    client: reqwest::Client,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    timeout: Option<Duration>,
}

impl HttpJob {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        method: Method,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            dependencies: Vec::new(),
            client,
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn error(&self, reason: impl Into<String>) -> JobError {
        JobError::Http {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Job for HttpJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    async fn execute(&self) -> Result<(), JobError> {
        let mut request = self.client.request(self.method.clone(), &self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                self.error("request timed out")
            } else {
                self.error(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(job = %self.name, status = %status, "Hook accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.error(format!("status {status}: {}", truncate(body.trim(), MAX_ERROR_BODY))))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
