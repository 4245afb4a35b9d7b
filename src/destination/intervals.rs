//! Intervals.icu upload destination.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;

use super::{ConfigError, Destination, PushError, Receipt};
use crate::config::IntervalsConfig;
use crate::ledger::Artifact;

pub const DEFAULT_BASE_URL: &str = "https://intervals.icu";

static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[_-]?").expect("valid date prefix regex"));

/// Uploads activity files to an Intervals.icu athlete.
pub struct IntervalsDestination {
    athlete_id: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl IntervalsDestination {
    pub const NAME: &'static str = "Intervals.icu";

    pub fn new(athlete_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            athlete_id: athlete_id.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &IntervalsConfig) -> Self {
        Self::new(config.athlete_id.clone(), config.api_key.clone())
            .with_base_url(config.base_url.clone())
    }

    /// Point at a different server (self-hosted proxy, test double).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/api/v1/athlete/{}/activities",
            self.base_url, self.athlete_id
        )
    }

    fn activity_url(&self, remote_id: &str) -> String {
        format!("{}/activities/{remote_id}", self.base_url)
    }

    async fn upload(&self, artifact: &Artifact) -> Result<Receipt, PushError> {
        let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
            PushError::Rejected(format!("read {}: {e}", artifact.path.display()))
        })?;

        let file_name = artifact.file_name();
        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| PushError::Rejected(format!("build upload: {e}")))?;

        let mut form = Form::new();
        if let Some(name) = extract_activity_name(Path::new(&file_name)) {
            form = form.text("name", name);
        }
        form = form.part("file", part);

        let response = self
            .client
            .post(self.upload_url())
            .basic_auth("API_KEY", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PushError::Transient(format!("send request: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            let remote_id = parse_remote_id(&body);
            let remote_locator = remote_id.as_deref().map(|id| self.activity_url(id));
            return Ok(Receipt::new(remote_id, remote_locator));
        }

        Err(classify_failure(status, &body))
    }
}

#[async_trait]
impl Destination for IntervalsDestination {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.athlete_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                destination: Self::NAME.to_string(),
                field: "athlete_id",
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                destination: Self::NAME.to_string(),
                field: "api_key",
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                destination: Self::NAME.to_string(),
                reason: format!("base_url '{}' is not an http(s) URL", self.base_url),
            });
        }
        Ok(())
    }

    async fn push(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Receipt, PushError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PushError::Cancelled),
            result = self.upload(artifact) => result,
        }
    }
}

/// Map a non-success HTTP status to a push error class.
fn classify_failure(status: StatusCode, body: &str) -> PushError {
    let detail = format!("API error {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::CONFLICT => PushError::Conflict {
            remote_id: parse_remote_id(body),
            detail,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => PushError::Transient(detail),
        s if s.is_server_error() => PushError::Transient(detail),
        _ => PushError::Rejected(detail),
    }
}

fn parse_remote_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let id = value.get("id")?;
    id.as_str()
        .map(str::to_string)
        .or_else(|| id.as_i64().map(|n| n.to_string()))
}

/// Human-readable activity name from a dated file name.
///
/// `2025-02-23_Hudayriyat_Ascend.fit` becomes `Hudayriyat Ascend`. Names
/// without a leading date, or with nothing after it, yield `None`.
pub fn extract_activity_name(file_name: &Path) -> Option<String> {
    let stem = file_name.file_stem()?.to_string_lossy();
    let matched = DATE_PREFIX.find(&stem)?;
    let rest = &stem[matched.end()..];

    let name = rest
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() { None } else { Some(name) }
}
