//! Direct HTTP streaming into a `.part` file with Range resume.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{PaheError, Result};
use crate::http_client::{HttpClient, HttpResponse};

/// Progress callback: bytes written so far and the expected total.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Sibling path used while a download is in flight.
pub fn part_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}

/// `scheme://host` of a URL, used as the default Referer.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

/// GET `url` and stream the body to `output`.
///
/// A leftover `.part` from an interrupted run is resumed with a Range
/// request: `206` appends, `200` starts over. A response that is not a
/// media file is rejected before anything is written. On any failure the
/// partial file is removed.
pub async fn stream_to_file(
    client: &HttpClient,
    url: &str,
    output: &Path,
    referer: Option<&str>,
    progress: ProgressFn<'_>,
) -> Result<u64> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(output);
    let resume_from = match fs::metadata(&part).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    };

    let referer = referer
        .map(|r| r.to_string())
        .or_else(|| origin_of(url))
        .unwrap_or_default();
    let mut headers = vec![
        ("Accept", "*/*".to_string()),
        ("Range", format!("bytes={resume_from}-")),
    ];
    if !referer.is_empty() {
        headers.push(("Referer", referer));
    }

    let response = client.get_stream(url, &headers).await?;
    if !response.is_success() {
        return Err(PaheError::network(url, format!("HTTP {}", response.status)));
    }
    if !response.is_file() {
        return Err(PaheError::LinkResolutionFailed(format!(
            "{url} did not return a media file (content-type {})",
            response.content_type().unwrap_or("unknown")
        )));
    }

    let append = resume_from > 0 && response.status == StatusCode::PARTIAL_CONTENT;
    if resume_from > 0 {
        if append {
            info!("Resuming {} at {} bytes", output.display(), resume_from);
        } else {
            debug!("Server ignored Range, restarting {}", output.display());
        }
    }

    finish(response, output, append, resume_from, progress).await
}

/// Write an already-open file response to `output` through its `.part`.
pub async fn save_response(
    response: HttpResponse,
    output: &Path,
    progress: ProgressFn<'_>,
) -> Result<u64> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).await?;
    }
    finish(response, output, false, 0, progress).await
}

async fn finish(
    response: HttpResponse,
    output: &Path,
    append: bool,
    resume_from: u64,
    progress: ProgressFn<'_>,
) -> Result<u64> {
    let part = part_path(output);
    match write_body(response, &part, append, resume_from, progress).await {
        Ok(written) => {
            fs::rename(&part, output).await?;
            info!("Download complete: {}", output.display());
            Ok(written)
        }
        Err(e) => {
            warn!("Download of {} failed: {}", output.display(), e);
            if let Err(rm) = fs::remove_file(&part).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    debug!("Could not remove {}: {}", part.display(), rm);
                }
            }
            Err(e)
        }
    }
}

async fn write_body(
    response: HttpResponse,
    part: &Path,
    append: bool,
    resume_from: u64,
    progress: ProgressFn<'_>,
) -> Result<u64> {
    let mut written = if append { resume_from } else { 0 };
    let total = response.content_length().map(|len| len + written);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(part)
        .await?;

    let mut stream = Box::pin(response.bytes_stream());
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress(written, total);
    }
    file.flush().await?;

    if let Some(total) = total {
        if written < total {
            return Err(PaheError::network(
                "",
                format!("stream ended at {written} of {total} bytes"),
            ));
        }
    }
    Ok(written)
}
