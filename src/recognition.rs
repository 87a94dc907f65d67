// src/recognition.rs
//
// Client for the remote card recognition service. One request in
// flight at a time, enforced by the capture scheduler — this client
// only builds, sends, and parses.

use crate::error::ScanError;
use crate::types::{DetectionParams, RawDetection};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Response of `POST /v1/process`.
#[derive(Debug, Deserialize)]
pub struct ProcessResponse {
    /// (height, width) of the submitted image as the backend saw it.
    #[serde(default)]
    pub image_size: Option<(u32, u32)>,
    pub num_detections: usize,
    pub detections: Vec<RawDetection>,
    /// Backend-annotated PNG, present when `visualize=true` was sent.
    #[serde(default)]
    pub visualization_png_b64: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub device: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub trait Recognizer: Send + Sync + 'static {
    /// Submit one encoded frame. Returns the ordered raw detections.
    fn submit(
        &self,
        frame_jpeg: Vec<u8>,
        params: DetectionParams,
    ) -> impl Future<Output = Result<Vec<RawDetection>, ScanError>> + Send;
}

#[derive(Clone)]
pub struct HttpRecognizer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Submit one frame and return the full response, including
    /// `image_size` and the backend's visualization PNG when requested.
    pub async fn process(
        &self,
        frame_jpeg: Vec<u8>,
        params: &DetectionParams,
    ) -> Result<ProcessResponse, ScanError> {
        let url = format!("{}/v1/process", self.base_url);
        let query = build_query(params);

        let part = reqwest::multipart::Part::bytes(frame_jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ScanError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&url)
            .query(&query)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScanError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = extract_error_message(status.as_u16(), &body);
            warn!("📡 Recognition request rejected: {}", message);
            return Err(ScanError::Network(message));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ScanError::Network(e.to_string()))?;
        parse_process_response(&body)
    }

    /// Probe `GET {backend}/health`.
    pub async fn health(&self) -> Result<Health, ScanError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ScanError::Network(format!(
                "health check failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        resp.json::<Health>()
            .await
            .map_err(|e| ScanError::MalformedResponse(e.to_string()))
    }
}

impl Recognizer for HttpRecognizer {
    fn submit(
        &self,
        frame_jpeg: Vec<u8>,
        params: DetectionParams,
    ) -> impl Future<Output = Result<Vec<RawDetection>, ScanError>> + Send {
        let this = self.clone();
        async move {
            let parsed = this.process(frame_jpeg, &params).await?;
            Ok(parsed.detections)
        }
    }
}

fn build_query(params: &DetectionParams) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("visualize", params.visualize.to_string()),
        ("conf", params.confidence.to_string()),
        ("iou", params.iou.to_string()),
        ("max_hits", params.max_detections.to_string()),
    ];
    if let Some((base, min, max)) = params.insets {
        query.push(("base_inset", base.to_string()));
        query.push(("inset_min", min.to_string()));
        query.push(("inset_max", max.to_string()));
    }
    query
}

fn parse_process_response(body: &str) -> Result<ProcessResponse, ScanError> {
    let parsed: ProcessResponse =
        serde_json::from_str(body).map_err(|e| ScanError::MalformedResponse(e.to_string()))?;

    if parsed.num_detections != parsed.detections.len() {
        debug!(
            "num_detections={} disagrees with detection list length {}",
            parsed.num_detections,
            parsed.detections.len()
        );
    }
    Ok(parsed)
}

/// Pull a human-readable message out of a JSON error body, falling back
/// to the numeric status code.
fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return format!("HTTP {}: {}", status, text);
            }
        }
    }
    format!("HTTP {}", status)
}
