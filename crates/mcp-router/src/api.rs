//! Thin HTTP client for the gateway API, translating error envelopes
//! into process exit codes.

use anyhow::Context;
use serde_json::Value;

/// Exit codes promised by the CLI contract.
pub const EXIT_RUNTIME: i32 = 1;
pub const EXIT_AUTH: i32 = 2;
pub const EXIT_POLICY: i32 = 3;
pub const EXIT_TIMEOUT: i32 = 4;

#[derive(Debug)]
pub struct CliError {
    pub exit_code: i32,
    pub message: String,
}

impl CliError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_RUNTIME,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        Self::runtime(format!("{error:#}"))
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
            token,
        }
    }

    pub async fn get(&self, path: &str) -> CliResult<Value> {
        let request = self.http.get(format!("{}{path}", self.base));
        self.send(request).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> CliResult<Value> {
        let request = self.http.post(format!("{}{path}", self.base)).json(body);
        self.send(request).await
    }

    pub async fn post_with_deadline(
        &self,
        path: &str,
        body: &Value,
        deadline_ms: Option<u64>,
    ) -> CliResult<Value> {
        let mut request = self.http.post(format!("{}{path}", self.base)).json(body);
        if let Some(deadline) = deadline_ms {
            request = request.header("x-request-deadline-ms", deadline.to_string());
        }
        self.send(request).await
    }

    pub async fn delete(&self, path: &str) -> CliResult<Value> {
        let request = self.http.delete(format!("{}{path}", self.base));
        self.send(request).await
    }

    async fn send(&self, mut request: reqwest::RequestBuilder) -> CliResult<Value> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("failed to reach the gateway; is `mcp-router serve` running?")?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let body: Value = response
            .json()
            .await
            .context("gateway returned a non-JSON body")?;

        if status.is_success() {
            return Ok(body);
        }

        let kind = body["error"]["kind"].as_str().unwrap_or("internal");
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("request failed")
            .to_string();
        Err(CliError {
            exit_code: exit_code_for(kind),
            message,
        })
    }
}

fn exit_code_for(kind: &str) -> i32 {
    match kind {
        "unauthenticated" => EXIT_AUTH,
        "forbidden" => EXIT_POLICY,
        "timeout" => EXIT_TIMEOUT,
        _ => EXIT_RUNTIME,
    }
}
