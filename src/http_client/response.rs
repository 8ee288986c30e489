//! HTTP response wrapper.

use std::collections::HashMap;

use bytes::Bytes;
use futures::Stream;
use reqwest::{Response, StatusCode};

/// Status and headers up front; the body stays unread until asked for.
pub struct HttpResponse {
    pub status: StatusCode,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    /// Final URL after redirects.
    pub url: String,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub(crate) fn new(response: Response) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        Self {
            status: response.status(),
            url: response.url().to_string(),
            headers,
            response,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|s| s.parse().ok())
    }

    pub fn content_disposition_filename(&self) -> Option<String> {
        self.header("content-disposition")
            .and_then(parse_content_disposition_filename)
    }

    /// Whether the response carries a media file rather than a page.
    pub fn is_file(&self) -> bool {
        is_file_response(self.content_type(), self.header("content-disposition"))
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.response.text().await
    }

    pub async fn bytes(self) -> Result<Vec<u8>, reqwest::Error> {
        self.response.bytes().await.map(|b| b.to_vec())
    }

    pub fn bytes_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        self.response.bytes_stream()
    }
}

/// Whether the headers describe a downloadable file.
pub fn is_file_response(content_type: Option<&str>, disposition: Option<&str>) -> bool {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    let disposition = disposition.unwrap_or_default().to_ascii_lowercase();
    content_type.contains("video")
        || content_type.contains("octet-stream")
        || disposition.contains("attachment")
        || disposition.contains("filename")
}

/// Parse filename from Content-Disposition header value.
/// Parses both `filename="name.mp4"` and `filename*=UTF-8''name.mp4` formats.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    if let Some(start) = header.find("filename=") {
        let rest = &header[start + 9..];
        let filename = match rest.strip_prefix('"') {
            Some(quoted) => quoted.split('"').next(),
            None => rest.split([';', ' ']).next(),
        };
        if let Some(name) = filename.map(str::trim).filter(|n| !n.is_empty()) {
            return Some(name.to_string());
        }
    }

    None
}
