//! Upload gateway: intake checks, PDF scan, and relay to the CMS.

use crate::config::Config;
use crate::forwarder::{DownstreamResponse, Forwarder};
use crate::multipart::{self, MultipartError};
use crate::scanner::{category_of, ScanInput, ScanReport};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Upload request as handed over by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Request `Content-Type` header.
    pub content_type: Option<String>,
    /// Request `Authorization` header, passed through downstream.
    pub authorization: Option<String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

/// Response the HTTP layer writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// JSON response.
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    /// Error response in the `{error, message, details}` shape.
    pub fn error(status: u16, message: &str, details: serde_json::Value) -> Self {
        Self::json(
            status,
            json!({
                "error": true,
                "message": message,
                "details": details,
            }),
        )
    }

    /// Relay a downstream response unchanged.
    fn relay(response: DownstreamResponse) -> Self {
        Self {
            status: response.status,
            content_type: response
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            body: response.body,
        }
    }

    #[cfg(test)]
    fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub requests_total: u64,
    pub uploads_rejected: u64,
    pub uploads_forwarded: u64,
    pub forward_errors: u64,
    pub bytes_scanned: u64,
}

/// Upload gateway.
pub struct UploadGateway {
    config: Arc<Config>,
    forwarder: Arc<dyn Forwarder>,
    /// Metrics: upload requests received.
    requests_total: AtomicU64,
    /// Metrics: uploads turned away (intake or scan).
    uploads_rejected: AtomicU64,
    /// Metrics: uploads relayed downstream.
    uploads_forwarded: AtomicU64,
    /// Metrics: downstream failures.
    forward_errors: AtomicU64,
    /// Metrics: bytes run through the scanner.
    bytes_scanned: AtomicU64,
}

impl UploadGateway {
    /// Create a new gateway.
    pub fn new(config: Config, forwarder: Arc<dyn Forwarder>) -> Self {
        info!(
            max_upload_size = config.upload.max_size,
            field = %config.upload.field_name,
            downstream = %config.downstream.upload_url(),
            "Upload gateway initialized"
        );

        Self {
            config: Arc::new(config),
            forwarder,
            requests_total: AtomicU64::new(0),
            uploads_rejected: AtomicU64::new(0),
            uploads_forwarded: AtomicU64::new(0),
            forward_errors: AtomicU64::new(0),
            bytes_scanned: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current counter values.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            uploads_forwarded: self.uploads_forwarded.load(Ordering::Relaxed),
            forward_errors: self.forward_errors.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
        }
    }

    /// Health endpoint payload.
    pub fn health(&self) -> GatewayResponse {
        GatewayResponse::json(
            200,
            json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "stats": self.stats(),
            }),
        )
    }

    /// Handle one upload: intake checks, scan, then forward on a clean verdict.
    pub async fn handle_upload(&self, request: UploadRequest) -> GatewayResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let input = match self.extract_upload(&request) {
            Ok(input) => input,
            Err(response) => {
                self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
                return response;
            }
        };

        self.bytes_scanned
            .fetch_add(input.data.len() as u64, Ordering::Relaxed);

        let start = Instant::now();
        let report = input.inspect();
        let scan_time = start.elapsed();

        if !report.verdict.is_allowed() {
            self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
            return self.rejection_response(&input, &report);
        }

        if self.config.settings.log_accepted {
            info!(
                filename = %input.filename,
                size = input.data.len(),
                scan_time_us = scan_time.as_micros(),
                "Scan complete: clean"
            );
        }

        let filename = input.filename.clone();
        match self
            .forwarder
            .forward(input, request.authorization.as_deref())
            .await
        {
            Ok(response) => {
                self.uploads_forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    filename = %filename,
                    status = response.status,
                    "Upload forwarded"
                );
                GatewayResponse::relay(response)
            }
            Err(e) => {
                self.forward_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, filename = %filename, "Forwarding upload failed");
                GatewayResponse::error(502, &e.to_string(), json!("Upload failed"))
            }
        }
    }

    /// Pull the file out of the request and apply intake limits.
    fn extract_upload(&self, request: &UploadRequest) -> Result<ScanInput, GatewayResponse> {
        let upload = &self.config.upload;

        let boundary = request
            .content_type
            .as_deref()
            .and_then(multipart::boundary_from_content_type)
            .ok_or_else(|| {
                debug!(content_type = ?request.content_type, "Request is not multipart");
                GatewayResponse::error(
                    400,
                    &MultipartError::MissingBoundary.to_string(),
                    json!("Expected multipart/form-data"),
                )
            })?;

        let part = match multipart::find_file_part(&request.body, &boundary, &upload.field_name) {
            Ok(Some(part)) => part,
            Ok(None) => {
                return Err(GatewayResponse::error(
                    400,
                    "No file uploaded",
                    json!(format!("Expected a file in field '{}'", upload.field_name)),
                ));
            }
            Err(e) => {
                debug!(error = %e, "Failed to read multipart body");
                return Err(GatewayResponse::error(400, &e.to_string(), json!("Upload failed")));
            }
        };

        if part.data.len() > upload.max_size {
            debug!(
                size = part.data.len(),
                max_size = upload.max_size,
                "File exceeds max size"
            );
            return Err(GatewayResponse::error(
                413,
                "File too large",
                json!({ "max_size": upload.max_size }),
            ));
        }

        if !self.config.accepts_content_type(part.content_type.as_deref()) {
            debug!(content_type = ?part.content_type, "File type not accepted");
            return Err(GatewayResponse::error(
                400,
                "Only PDF files are allowed",
                json!({ "content_type": part.content_type }),
            ));
        }

        Ok(ScanInput::new(part.data, part.filename))
    }

    fn rejection_response(&self, input: &ScanInput, report: &ScanReport) -> GatewayResponse {
        let reason = match report.verdict.reason() {
            Some(reason) => reason,
            None => return GatewayResponse::error(500, "Inconsistent scan verdict", json!(null)),
        };

        if self.config.settings.log_rejections {
            info!(
                filename = %input.filename,
                size = input.data.len(),
                reason = %reason,
                markers = ?report.markers(),
                categories = ?marker_categories(report.markers()),
                "Upload rejected"
            );
        }

        GatewayResponse::error(
            400,
            reason.message(),
            json!({
                "reason": reason,
                "markers": report.markers(),
                "findings": report.findings,
            }),
        )
    }
}

/// Distinct category labels of the given markers, in first-seen order.
fn marker_categories(markers: &[&str]) -> Vec<&'static str> {
    let mut labels = Vec::new();
    for label in markers.iter().filter_map(|m| category_of(m)).map(|c| c.label()) {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownstreamConfig;
    use crate::forwarder::ForwardError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const BOUNDARY: &str = "XgatewayX";

    /// Records forwarded uploads and answers with a canned result.
    struct FakeForwarder {
        calls: Mutex<Vec<(String, Vec<u8>, Option<String>)>>,
        fail: bool,
    }

    impl FakeForwarder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn calls(&self) -> Vec<(String, Vec<u8>, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Forwarder for FakeForwarder {
        async fn forward(
            &self,
            input: ScanInput,
            authorization: Option<&str>,
        ) -> Result<DownstreamResponse, ForwardError> {
            self.calls.lock().unwrap().push((
                input.filename,
                input.data,
                authorization.map(|s| s.to_string()),
            ));
            if self.fail {
                return Err(ForwardError::Timeout);
            }
            Ok(DownstreamResponse {
                status: 201,
                content_type: Some("application/json".to_string()),
                body: br#"[{"id":1}]"#.to_vec(),
            })
        }
    }

    fn create_test_config() -> Config {
        Config {
            downstream: DownstreamConfig {
                url: "http://cms.local:1337".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn upload_request(filename: &str, content_type: &str, data: &[u8]) -> UploadRequest {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        UploadRequest {
            content_type: Some(format!("multipart/form-data; boundary={}", BOUNDARY)),
            authorization: Some("Bearer abc".to_string()),
            body,
        }
    }

    #[tokio::test]
    async fn test_clean_upload_is_forwarded() {
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request("a.pdf", "application/pdf", b"%PDF-1.4 plain text"))
            .await;

        assert_eq!(response.status, 201);
        assert_eq!(response.content_type, "application/json");
        assert_eq!(response.body, br#"[{"id":1}]"#.to_vec());

        let calls = forwarder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "a.pdf");
        assert_eq!(calls[0].1, b"%PDF-1.4 plain text".to_vec());
        assert_eq!(calls[0].2.as_deref(), Some("Bearer abc"));

        let stats = gateway.stats();
        assert_eq!(stats.requests_total, 1);
        assert_eq!(stats.uploads_forwarded, 1);
        assert_eq!(stats.bytes_scanned, 19);
    }

    #[tokio::test]
    async fn test_high_risk_upload_is_rejected() {
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request(
                "evil.pdf",
                "application/pdf",
                b"%PDF-1.4 /OpenAction << /S /JavaScript >>",
            ))
            .await;

        assert_eq!(response.status, 400);
        let body = response.json_body().unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(
            body["message"],
            "PDF security check failed: High-risk content detected"
        );
        assert_eq!(body["details"]["reason"], "high-risk");
        assert_eq!(body["details"]["markers"], json!(["/JavaScript", "/OpenAction"]));
        assert!(forwarder.calls().is_empty());
        assert_eq!(gateway.stats().uploads_rejected, 1);
    }

    #[tokio::test]
    async fn test_encrypted_upload_is_medium_risk() {
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request(
                "locked.pdf",
                "application/pdf",
                b"%PDF-1.4 /Encrypt /Filter/Standard",
            ))
            .await;

        assert_eq!(response.status, 400);
        let body = response.json_body().unwrap();
        assert_eq!(body["details"]["reason"], "medium-risk");
        assert_eq!(body["details"]["markers"], json!([]));
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_format_is_rejected() {
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request("fake.pdf", "application/pdf", b"hello world"))
            .await;

        assert_eq!(response.status, 400);
        let body = response.json_body().unwrap();
        assert_eq!(body["message"], "Invalid PDF format");
        assert_eq!(body["details"]["reason"], "invalid-format");
        assert!(body["details"]["findings"].is_null());
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_content_type() {
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request("a.png", "image/png", b"%PDF-1.4"))
            .await;

        assert_eq!(response.status, 400);
        assert_eq!(
            response.json_body().unwrap()["message"],
            "Only PDF files are allowed"
        );
        assert_eq!(gateway.stats().bytes_scanned, 0);
    }

    #[tokio::test]
    async fn test_file_too_large() {
        let mut config = create_test_config();
        config.upload.max_size = 16;
        let forwarder = FakeForwarder::new(false);
        let gateway = UploadGateway::new(config, forwarder.clone());

        let response = gateway
            .handle_upload(upload_request("big.pdf", "application/pdf", &[b'a'; 17]))
            .await;

        assert_eq!(response.status, 413);
        assert!(forwarder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_file_uploaded() {
        let gateway = UploadGateway::new(create_test_config(), FakeForwarder::new(false));

        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let response = gateway
            .handle_upload(UploadRequest {
                content_type: Some(format!("multipart/form-data; boundary={}", BOUNDARY)),
                authorization: None,
                body: body.into_bytes(),
            })
            .await;

        assert_eq!(response.status, 400);
        assert_eq!(response.json_body().unwrap()["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_not_multipart() {
        let gateway = UploadGateway::new(create_test_config(), FakeForwarder::new(false));

        let response = gateway
            .handle_upload(UploadRequest {
                content_type: Some("application/pdf".to_string()),
                authorization: None,
                body: b"%PDF-1.4".to_vec(),
            })
            .await;

        assert_eq!(response.status, 400);
        assert_eq!(
            response.json_body().unwrap()["message"],
            "Missing multipart boundary"
        );
    }

    #[tokio::test]
    async fn test_forward_failure() {
        let forwarder = FakeForwarder::new(true);
        let gateway = UploadGateway::new(create_test_config(), forwarder.clone());

        let response = gateway
            .handle_upload(upload_request("a.pdf", "application/pdf", b"%PDF-1.4"))
            .await;

        assert_eq!(response.status, 502);
        let body = response.json_body().unwrap();
        assert_eq!(body["message"], "Downstream request timed out");
        assert_eq!(body["details"], "Upload failed");
        assert_eq!(gateway.stats().forward_errors, 1);
    }

    #[test]
    fn test_health() {
        let gateway = UploadGateway::new(create_test_config(), FakeForwarder::new(false));
        let health = gateway.health();
        assert_eq!(health.status, 200);
        let body = health.json_body().unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["stats"]["requests_total"], 0);
    }

    #[test]
    fn test_relay_defaults_content_type() {
        let response = GatewayResponse::relay(DownstreamResponse {
            status: 204,
            content_type: None,
            body: Vec::new(),
        });
        assert_eq!(response.status, 204);
        assert_eq!(response.content_type, "application/octet-stream");
    }

    #[test]
    fn test_marker_categories() {
        assert_eq!(
            marker_categories(&["/JS", "/AA", "/EF", "/XFA"]),
            vec!["active-content", "embedded-resource", "other-dangerous"]
        );
        assert_eq!(marker_categories(&["/AcroForm"]), vec!["form"]);
        assert!(marker_categories(&[]).is_empty());
    }
}
