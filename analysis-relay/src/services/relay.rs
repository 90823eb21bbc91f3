//! Upload relay to the analysis server.
//!
//! Each call re-encodes the buffered upload as a multipart form, posts it to
//! `{base}/analyze` and hands back the raw response body. The relay keeps no
//! per-request state; the pooled HTTP client is shared by every request.

use crate::config::UpstreamConfig;
use crate::models::{AnalysisResult, InboundFile};
use metrics::{counter, histogram};
use reqwest::{multipart, Client, StatusCode};
use service_core::error::AppError;
use std::time::Instant;

const ANALYZE_PATH: &str = "/analyze";
const FILE_FIELD: &str = "file";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Why a relay attempt failed. Mapped to an HTTP status by the handler layer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Analysis server address is not configured")]
    ConfigurationMissing,

    /// Upstream answered with anything but 200. `body` is for logs only.
    #[error("Analysis server responded with {status}")]
    UpstreamRejected { status: StatusCode, body: String },

    /// Connect failure, timeout or a broken connection while reading the body.
    #[error("Analysis server is unreachable: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl RelayError {
    fn outcome(&self) -> &'static str {
        match self {
            RelayError::ConfigurationMissing => "not_configured",
            RelayError::UpstreamRejected { .. } => "rejected",
            RelayError::UpstreamUnreachable(_) => "unreachable",
            RelayError::Unexpected(_) => "error",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            RelayError::Unexpected(anyhow::Error::new(err))
        } else {
            RelayError::UpstreamUnreachable(err)
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::ConfigurationMissing => {
                AppError::ConfigError(anyhow::anyhow!("Analysis server address is not configured"))
            }
            RelayError::UpstreamRejected { status, .. } => AppError::Upstream {
                status,
                message: "Analysis server error".to_string(),
            },
            RelayError::UpstreamUnreachable(_) => {
                AppError::ServiceUnavailable("Cannot connect to the analysis server".to_string())
            }
            RelayError::Unexpected(e) => AppError::InternalError(e),
        }
    }
}

#[derive(Clone)]
pub struct UploadRelay {
    client: Client,
    analyze_url: Option<String>,
}

impl UploadRelay {
    pub fn new(config: &UpstreamConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            analyze_url: config.base_url.as_deref().map(analyze_url),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.analyze_url.is_some()
    }

    pub fn analyze_url(&self) -> Option<&str> {
        self.analyze_url.as_deref()
    }

    /// Forward `upload` and return the analysis server's response body.
    pub async fn relay(&self, upload: InboundFile) -> Result<AnalysisResult, RelayError> {
        let result = self.forward(upload).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        counter!("relay_requests_total", "outcome" => outcome).increment(1);

        result
    }

    async fn forward(&self, upload: InboundFile) -> Result<AnalysisResult, RelayError> {
        let url = self
            .analyze_url
            .as_deref()
            .ok_or(RelayError::ConfigurationMissing)?;

        let InboundFile {
            filename,
            content_type,
            bytes,
        } = upload;
        let size = bytes.len();

        let content_type = checked_content_type(&filename, &content_type);
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part(FILE_FIELD, part);

        tracing::info!(
            filename = %filename,
            size = size,
            upstream = %url,
            "Forwarding upload to analysis server"
        );

        let started = Instant::now();
        let upstream = self.call_upstream(url, form, &filename).await;
        let elapsed = started.elapsed();

        let outcome = match &upstream {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        histogram!("relay_upstream_duration_seconds", "outcome" => outcome)
            .record(elapsed.as_secs_f64());

        let payload = upstream?;

        tracing::info!(
            filename = %filename,
            result_size = payload.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Analysis completed"
        );

        Ok(AnalysisResult {
            source_filename: filename,
            bytes: payload,
        })
    }

    /// One POST to the analysis server. Only an exact 200 counts as a result.
    async fn call_upstream(
        &self,
        url: &str,
        form: multipart::Form,
        filename: &str,
    ) -> Result<Vec<u8>, RelayError> {
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(filename = %filename, error = %e, "Failed to reach analysis server");
                RelayError::from(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            tracing::error!(
                filename = %filename,
                status = %status,
                body = %body,
                "Analysis server rejected upload"
            );
            return Err(RelayError::UpstreamRejected { status, body });
        }

        let payload = response.bytes().await.map_err(|e| {
            tracing::error!(filename = %filename, error = %e, "Failed to read analysis result");
            RelayError::from(e)
        })?;

        Ok(payload.to_vec())
    }
}

fn analyze_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), ANALYZE_PATH)
}

/// Returns the declared content type when reqwest accepts it, otherwise the
/// generic binary type.
fn checked_content_type<'a>(filename: &str, declared: &'a str) -> &'a str {
    if multipart::Part::bytes(Vec::new()).mime_str(declared).is_ok() {
        declared
    } else {
        tracing::warn!(
            filename = %filename,
            content_type = %declared,
            "Invalid content type on upload, sending as {}",
            FALLBACK_CONTENT_TYPE
        );
        FALLBACK_CONTENT_TYPE
    }
}
