//! HTTP/1.1 front end for the upload gateway.
//!
//! One request per connection. Bodies must carry a `Content-Length`; chunked
//! uploads are refused with 411. Other transfer codings are ignored.

use crate::cors;
use crate::gateway::{GatewayResponse, UploadGateway, UploadRequest};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Room for multipart framing and other form fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Request line plus headers.
const MAX_HEAD_SIZE: usize = 16 * 1024;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed request head.
#[derive(Debug, Clone)]
struct RequestHead {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Listening gateway server.
pub struct GatewayServer {
    gateway: Arc<UploadGateway>,
    listener: TcpListener,
}

impl GatewayServer {
    /// Bind to the configured listen address.
    pub async fn bind(gateway: Arc<UploadGateway>) -> Result<Self> {
        let addr = gateway.config().listen_addr()?;
        Self::bind_addr(gateway, addr).await
    }

    /// Bind to an explicit address.
    pub async fn bind_addr(gateway: Arc<UploadGateway>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { gateway, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "Upload gateway listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down upload gateway");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let gateway = self.gateway.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, gateway).await {
                                warn!(peer = %peer_addr, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                }
            }
        }
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}

/// Handle a single connection.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    gateway: Arc<UploadGateway>,
) -> Result<()> {
    let mut reader = BufReader::new(&mut stream);

    let head = match tokio::time::timeout(READ_TIMEOUT, read_head(&mut reader)).await {
        Ok(Ok(Some(head))) => head,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            debug!(peer = %peer_addr, error = %e, "Bad request head");
            drop(reader);
            return write_response(&mut stream, &head_error_response(&e), &[]).await;
        }
        Err(_) => {
            debug!(peer = %peer_addr, "Timed out reading request head");
            return Ok(());
        }
    };

    debug!(peer = %peer_addr, method = %head.method, path = %head.path, "Request");

    let config = gateway.config();
    let origin = head.header("origin").map(|s| s.to_string());
    let upload_path = config.downstream.upload_path.as_str();

    let (response, cors_headers) = if head.method == "OPTIONS" {
        let headers = cors::preflight_headers(config, origin.as_deref());
        (empty_response(204), headers)
    } else if head.method == "GET" && head.path == "/health" {
        (gateway.health(), cors::response_headers(config, origin.as_deref()))
    } else if head.path == upload_path {
        let response = if head.method != "POST" {
            GatewayResponse::error(405, "Method not allowed", json!(null))
        } else {
            match read_body(&mut reader, &head, config.upload.max_size).await {
                Ok(body) => {
                    let request = UploadRequest {
                        content_type: head.header("content-type").map(|s| s.to_string()),
                        authorization: head.header("authorization").map(|s| s.to_string()),
                        body,
                    };
                    gateway.handle_upload(request).await
                }
                Err(response) => response,
            }
        };
        (response, cors::response_headers(config, origin.as_deref()))
    } else {
        (
            GatewayResponse::error(404, "Not found", json!(head.path)),
            cors::response_headers(config, origin.as_deref()),
        )
    };

    drop(reader);
    write_response(&mut stream, &response, &cors_headers).await
}

fn head_error_response(e: &HeadError) -> GatewayResponse {
    match e {
        HeadError::TooLarge => GatewayResponse::error(
            431,
            "Request header fields too large",
            json!({ "max_head_size": MAX_HEAD_SIZE }),
        ),
        e => GatewayResponse::error(400, "Bad request", json!(e.to_string())),
    }
}

/// Error while reading the request head.
#[derive(Debug)]
enum HeadError {
    /// Request line plus headers exceed `MAX_HEAD_SIZE`.
    TooLarge,
    /// Request line or header framing is broken.
    Malformed(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for HeadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadError::TooLarge => write!(f, "Request head too large"),
            HeadError::Malformed(msg) => write!(f, "Malformed request head: {}", msg),
            HeadError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for HeadError {}

impl From<std::io::Error> for HeadError {
    fn from(e: std::io::Error) -> Self {
        HeadError::Io(e)
    }
}

/// Read the request line and headers. `None` on a connection closed before
/// anything was sent.
///
/// At most `MAX_HEAD_SIZE` bytes are pulled for the whole head, so a single
/// endless line cannot grow the buffer past that.
async fn read_head<R>(reader: &mut R) -> std::result::Result<Option<RequestHead>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_HEAD_SIZE as u64);

    let mut request_line = String::new();
    if read_head_line(&mut limited, &mut request_line).await? == 0 {
        return Ok(None);
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(HeadError::Malformed("invalid request line"));
    }
    let method = parts[0].to_uppercase();
    let path = parts[1].split('?').next().unwrap_or(parts[1]).to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if read_head_line(&mut limited, &mut line).await? == 0 {
            return Err(HeadError::Malformed("connection closed inside request head"));
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    Ok(Some(RequestHead {
        method,
        path,
        headers,
    }))
}

/// Read one line from the size-limited head reader. A line cut short by the
/// limit, or a read after the limit is spent, is `TooLarge`.
async fn read_head_line<R>(
    reader: &mut tokio::io::Take<R>,
    line: &mut String,
) -> std::result::Result<usize, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let n = reader.read_line(line).await?;
    if reader.limit() == 0 && !line.ends_with('\n') {
        return Err(HeadError::TooLarge);
    }
    Ok(n)
}

/// Read the request body, refusing oversized bodies before reading them.
async fn read_body<R>(
    reader: &mut R,
    head: &RequestHead,
    max_file_size: usize,
) -> std::result::Result<Vec<u8>, GatewayResponse>
where
    R: AsyncReadExt + Unpin,
{
    let chunked = head
        .header("transfer-encoding")
        .map(|te| te.split(',').any(|c| c.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    if chunked {
        return Err(GatewayResponse::error(
            411,
            "Length required",
            json!("Chunked uploads are not supported"),
        ));
    }

    let content_length = match head.header("content-length").map(|v| v.parse::<usize>()) {
        Some(Ok(len)) => len,
        Some(Err(_)) => {
            return Err(GatewayResponse::error(
                400,
                "Invalid Content-Length",
                json!(null),
            ))
        }
        None => return Err(GatewayResponse::error(411, "Length required", json!(null))),
    };

    let limit = max_file_size.saturating_add(MULTIPART_OVERHEAD);
    if content_length > limit {
        debug!(content_length, limit, "Request body exceeds limit");
        return Err(GatewayResponse::error(
            413,
            "File too large",
            json!({ "max_size": max_file_size }),
        ));
    }

    let mut body = vec![0u8; content_length];
    match tokio::time::timeout(READ_TIMEOUT, reader.read_exact(&mut body)).await {
        Ok(Ok(_)) => Ok(body),
        Ok(Err(e)) => Err(GatewayResponse::error(
            400,
            "Incomplete request body",
            json!(e.to_string()),
        )),
        Err(_) => Err(GatewayResponse::error(
            408,
            "Request timeout",
            json!(null),
        )),
    }
}

fn empty_response(status: u16) -> GatewayResponse {
    GatewayResponse {
        status,
        content_type: String::new(),
        body: Vec::new(),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    response: &GatewayResponse,
    extra_headers: &[(&'static str, String)],
) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    if !response.content_type.is_empty() {
        head.push_str(&format!("Content-Type: {}\r\n", response.content_type));
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    for (name, value) in extra_headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
