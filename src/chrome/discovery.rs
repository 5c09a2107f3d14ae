use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::error::ChromeError;

/// Browser version information returned by `/json/version`.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct BrowserVersion {
    /// The browser name and version (e.g. "Chrome/144.0.0.0").
    #[serde(rename = "Browser", default)]
    pub browser: String,

    /// The CDP protocol version (e.g. "1.3").
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,

    /// The browser-level WebSocket debugger URL.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// Query the browser's `/json/version` endpoint.
///
/// # Errors
///
/// Returns `ChromeError::Http` on connection failure or `ChromeError::Parse`
/// if the response cannot be deserialized.
pub async fn query_version(host: &str, port: u16) -> Result<BrowserVersion, ChromeError> {
    let body = http_get(host, port, "/json/version").await?;
    serde_json::from_str(&body).map_err(|e| ChromeError::Parse(e.to_string()))
}

/// Resolve a configured `CDP_URL` to a browser WebSocket URL.
///
/// A ws:// or wss:// URL is used as-is. An http:// or https:// URL is
/// treated as a debug endpoint base and resolved via `/json/version`.
///
/// # Errors
///
/// Returns `ChromeError::BadCdpUrl` for unrecognized schemes or malformed
/// URLs, and discovery errors from the version query.
pub async fn resolve_ws_url(cdp_url: &str) -> Result<String, ChromeError> {
    if cdp_url.starts_with("ws://") || cdp_url.starts_with("wss://") {
        return Ok(cdp_url.to_owned());
    }
    if let Some((host, port)) = parse_http_host_port(cdp_url) {
        let version = query_version(&host, port).await?;
        return Ok(version.ws_debugger_url);
    }
    Err(ChromeError::BadCdpUrl(cdp_url.to_owned()))
}

/// Extract `(host, port)` from an `http://host[:port]` style URL.
fn parse_http_host_port(url: &str) -> Option<(String, u16)> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    match authority.split_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().ok()?;
            Some((host.to_owned(), port))
        }
        None => Some((authority.to_owned(), 80)),
    }
}

/// Plain HTTP/1.1 GET over a raw TCP stream.
///
/// The debug endpoint speaks trivial HTTP; a full client stack is not
/// worth carrying for one localhost round-trip.
async fn http_get(host: &str, port: u16, path: &str) -> Result<String, ChromeError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ChromeError::Http(e.to_string()))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}:{port}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ChromeError::Http(e.to_string()))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .map_err(|e| ChromeError::Http(e.to_string()))?;

    let response = String::from_utf8_lossy(&response);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .ok_or_else(|| ChromeError::Parse("no HTTP body in response".into()))?;
    Ok(body.to_owned())
}
