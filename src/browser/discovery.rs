//! Discovery endpoint access: `/json/version` and `/json/list`.
//!
//! The endpoint is loopback-only and serves two tiny JSON documents, so a
//! full HTTP client is not warranted. One async request is written over a
//! plain `TcpStream` and the response is read line-oriented: status line,
//! headers until the blank line, then a body sized by `Content-Length`
//! (or whatever arrives before the server closes).

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::BrowserError;

/// Overall deadline for one discovery request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Browser version information returned by `/json/version`.
#[derive(Debug, Deserialize)]
pub struct BrowserVersion {
    /// Browser name and version, e.g. "Chrome/126.0.6478.61".
    #[serde(rename = "Browser")]
    pub browser: String,

    /// CDP protocol version, e.g. "1.3".
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,

    /// The browser-level WebSocket debugger URL.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// One debuggable target as reported by `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSummary {
    pub id: String,

    #[serde(rename = "type")]
    pub target_type: String,

    pub title: String,

    pub url: String,
}

/// Query the browser's `/json/version` endpoint.
///
/// # Errors
///
/// Returns `BrowserError::Http` on connection failure or
/// `BrowserError::Parse` if the body cannot be deserialized.
pub async fn query_version(host: &str, port: u16) -> Result<BrowserVersion, BrowserError> {
    let body = fetch_json(host, port, "/json/version").await?;
    serde_json::from_str(&body).map_err(|e| BrowserError::Parse(e.to_string()))
}

/// Query the browser's `/json/list` endpoint for debuggable targets.
///
/// # Errors
///
/// Returns `BrowserError::Http` on connection failure or
/// `BrowserError::Parse` if the body cannot be deserialized.
pub async fn query_targets(host: &str, port: u16) -> Result<Vec<TargetSummary>, BrowserError> {
    let body = fetch_json(host, port, "/json/list").await?;
    serde_json::from_str(&body).map_err(|e| BrowserError::Parse(e.to_string()))
}

/// GET one discovery path and return the response body.
async fn fetch_json(host: &str, port: u16, path: &str) -> Result<String, BrowserError> {
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}:{port}\r\nAccept: application/json\r\nConnection: close\r\n\r\n"
    );

    let exchange = async {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| BrowserError::Http(format!("connect {host}:{port}: {e}")))?;
        let mut stream = BufReader::new(stream);
        stream
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| BrowserError::Http(format!("request write: {e}")))?;
        read_http_response(&mut stream).await
    };

    match tokio::time::timeout(FETCH_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Http(format!(
            "{path} took longer than {FETCH_TIMEOUT:?}"
        ))),
    }
}

/// Read one HTTP response and return its body. Only 200 passes.
async fn read_http_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, BrowserError> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| BrowserError::Http(format!("status read: {e}")))?;
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if status != "200" {
        return Err(BrowserError::Http(format!(
            "endpoint answered {}",
            status_line.trim()
        )));
    }

    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| BrowserError::Http(format!("header read: {e}")))?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok();
            }
        }
    }

    match content_length {
        Some(len) => {
            let mut body = vec![0u8; len];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|e| BrowserError::Http(format!("body read: {e}")))?;
            String::from_utf8(body).map_err(|e| BrowserError::Parse(format!("body is not UTF-8: {e}")))
        }
        None => {
            // No length header: the Connection: close handshake means the
            // body ends when the server hangs up.
            let mut body = String::new();
            reader
                .read_to_string(&mut body)
                .await
                .map_err(|e| BrowserError::Http(format!("body read: {e}")))?;
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_fixture(raw: &[u8]) -> Result<String, BrowserError> {
        let mut reader = BufReader::new(raw);
        read_http_response(&mut reader).await
    }

    #[tokio::test]
    async fn body_sized_by_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\n{\"ok\":{}}extra junk after the body";
        assert_eq!(read_fixture(raw).await.unwrap(), "{\"ok\":{}}");
    }

    #[tokio::test]
    async fn body_without_length_reads_to_close() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\n[1,2,3]";
        assert_eq!(read_fixture(raw).await.unwrap(), "[1,2,3]");
    }

    #[tokio::test]
    async fn length_header_is_case_insensitive() {
        let raw = b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi";
        assert_eq!(read_fixture(raw).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn non_200_status_is_rejected() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let err = read_fixture(raw).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort";
        assert!(read_fixture(raw).await.is_err());
    }

    #[test]
    fn version_document_deserializes() {
        let json = r#"{
            "Browser": "Chromium/138.0.7204.49",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9230/devtools/browser/52ab-9f"
        }"#;
        let version: BrowserVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.browser, "Chromium/138.0.7204.49");
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.ws_debugger_url.contains("/devtools/browser/"));
    }

    #[test]
    fn target_list_deserializes() {
        let json = r#"[
            {"id": "52AB9F", "title": "Dashboard", "type": "page",
             "url": "http://localhost:3000/dash"},
            {"id": "77CC00", "title": "", "type": "service_worker",
             "url": "http://localhost:3000/sw.js"}
        ]"#;
        let targets: Vec<TargetSummary> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].target_type, "page");
        assert_eq!(targets[1].id, "77CC00");
    }
}
