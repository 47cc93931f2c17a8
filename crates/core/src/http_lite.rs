//! A hand-rolled, minimal HTTP/1.1 client used for the two console
//! exchanges that the spec describes as raw HTTP-like text over a plain
//! `TcpStream` (§4.4, §4.5). Neither console endpoint is a general-purpose
//! web server, so this sticks to exactly what's needed -- a request line,
//! a handful of headers, an optional body, and a status-line + headers +
//! `Content-Length` body response -- rather than pulling in a full HTTP
//! client stack for two fixed exchanges.

use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum HttpLiteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed status line: {0}")]
    BadStatusLine(String),
    #[error("connection closed before headers completed")]
    Truncated,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Write `{request_line}\r\n{headers}\r\n\r\n{body}` to `stream`.
pub async fn send_request(
    stream: &mut TcpStream,
    request_line: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> Result<(), HttpLiteError> {
    let mut buf = format!("{request_line}\r\n");
    for (name, value) in headers {
        buf.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        buf.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    buf.push_str("\r\n");
    stream.write_all(buf.as_bytes()).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Read a status line, headers, and a `Content-Length`-bounded body. Headers
/// with no body (`Content-Length` absent or zero) return an empty body.
pub async fn read_response(stream: &mut TcpStream) -> Result<HttpResponse, HttpLiteError> {
    let mut reader = BufReader::new(stream);
    let mut header_bytes = Vec::new();
    let mut byte = [0u8; 1];
    let mut seen = Vec::new();
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(HttpLiteError::Truncated);
        }
        seen.push(byte[0]);
        header_bytes.push(byte[0]);
        if seen.ends_with(b"\r\n\r\n") || seen.ends_with(b"\n\n") {
            break;
        }
    }
    let header_text = String::from_utf8_lossy(&header_bytes);
    let mut lines = header_text.split('\n').map(|l| l.trim_end_matches('\r'));

    let status_line = lines.next().ok_or(HttpLiteError::Truncated)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| HttpLiteError::BadStatusLine(status_line.to_string()))?
        .parse()
        .map_err(|_| HttpLiteError::BadStatusLine(status_line.to_string()))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Minimal server-side request reader used only by other modules' tests to
/// stand up a mock console endpoint.
#[cfg(test)]
pub struct TestRequest {
    pub request_line: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[cfg(test)]
pub async fn read_request_for_test(stream: &mut TcpStream) -> TestRequest {
    let mut reader = BufReader::new(stream);
    let mut header_bytes = Vec::new();
    let mut byte = [0u8; 1];
    let mut seen = Vec::new();
    loop {
        let n = reader.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before headers completed");
        seen.push(byte[0]);
        header_bytes.push(byte[0]);
        if seen.ends_with(b"\r\n\r\n") || seen.ends_with(b"\n\n") {
            break;
        }
    }
    let header_text = String::from_utf8_lossy(&header_bytes);
    let mut lines = header_text.split('\n').map(|l| l.trim_end_matches('\r'));
    let request_line = lines.next().unwrap().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await.unwrap();
    }

    TestRequest {
        request_line,
        headers,
        body,
    }
}
