use crate::errors::{MirrorError, Result};
use crate::sanitize::{sanitize_file_name, split_extension};
use crate::session::{request_error, Session};
use lazy_static::lazy_static;
use phf::phf_map;
use regex::Regex;
use reqwest::header::{self, HeaderMap};
use reqwest::Response;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Bytes a server may over-report before an existing file counts as truncated.
pub const INCOMPLETE_SLACK_BYTES: u64 = 2;

const DEFAULT_FILE_NAME: &str = "index.html";

lazy_static! {
    static ref DISPOSITION_EXTENDED: Regex =
        Regex::new(r#"(?i)filename\*\s*=\s*([^']*)'[^']*'([^;]+)"#).unwrap();
    static ref DISPOSITION_QUOTED: Regex = Regex::new(r#"(?i)filename\s*=\s*"(.*?)""#).unwrap();
    static ref DISPOSITION_BARE: Regex = Regex::new(r#"(?i)filename\s*=\s*([^";]+)"#).unwrap();
}

/// What to do with a resource given what's already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing at the destination yet.
    Fetch,
    /// A file exists but is shorter than the server says it should be. It gets
    /// downloaded again from scratch and overwritten.
    Incomplete { expected: u64, actual: u64 },
    /// A file exists and looks complete, or its completeness can't be judged.
    Skip,
}

impl Decision {
    pub fn should_fetch(&self) -> bool {
        !matches!(self, Decision::Skip)
    }
}

/// Decides whether `path` has to be (re)downloaded.
///
/// This is a length heuristic, not an integrity check: an existing file is only
/// considered incomplete when the advertised length exceeds its size by more
/// than [`INCOMPLETE_SLACK_BYTES`]. With no usable length the existing file is
/// trusted. A corrupt file of the right size is never detected.
pub async fn decide(path: &Path, expected_len: Option<u64>) -> Decision {
    let actual = match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Decision::Fetch,
    };
    match expected_len {
        Some(expected) if expected > 0 => {
            if expected.saturating_sub(actual) > INCOMPLETE_SLACK_BYTES {
                Decision::Incomplete { expected, actual }
            } else {
                Decision::Skip
            }
        }
        _ => Decision::Skip,
    }
}

/// Outcome of a single resource download.
#[derive(Debug, Clone, PartialEq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub decision: Decision,
    pub bytes_written: u64,
}

/// Downloads `url` into `dest_dir`. The file name is `file_name` when given,
/// otherwise taken from the Content-Disposition header, otherwise from the url.
#[tracing::instrument(skip(session))]
pub async fn download_resource(
    session: &Session,
    url: &str,
    dest_dir: &Path,
    file_name: Option<&str>,
) -> Result<Downloaded> {
    if !fs::try_exists(dest_dir).await.unwrap_or(false) {
        tracing::error!("Destination directory does not exist. Aborting...");
        return Err(MirrorError::FileOperationError {
            file_name: dest_dir.to_string_lossy().to_string(),
            message: "destination directory does not exist".into(),
        });
    }

    let mut response = session.open(url).await?;
    let headers = response.headers();
    let expected_len = content_length(headers);

    let f_name = match file_name {
        Some(name) => name.to_string(),
        None => resource_file_name(url, headers),
    };
    tracing::debug!("File name for {} is {}", url, &f_name);
    let path = dest_dir.join(&f_name);

    let decision = decide(&path, expected_len).await;
    if !decision.should_fetch() {
        tracing::info!("\"{}\" already exists, skipping", f_name);
        return Ok(Downloaded {
            path,
            decision,
            bytes_written: 0,
        });
    }
    if let Decision::Incomplete { expected, actual } = decision {
        tracing::info!(
            "\"{}\" seems incomplete ({} of {} bytes), downloading again",
            f_name,
            actual,
            expected
        );
    }

    let bytes_written = stream_to_file(&mut response, url, &path).await?;
    tracing::debug!(
        "Download completed for {}, file @ {}",
        url,
        path.to_string_lossy()
    );
    Ok(Downloaded {
        path,
        decision,
        bytes_written,
    })
}

/// Downloads `url` to exactly `path`, overwriting it. Callers do their own
/// existence checks.
#[tracing::instrument(skip(session))]
pub async fn retrieve(session: &Session, url: &str, path: &Path) -> Result<u64> {
    let mut response = session.open(url).await?;
    stream_to_file(&mut response, url, path).await
}

async fn stream_to_file(response: &mut Response, url: &str, path: &Path) -> Result<u64> {
    let mut dest_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| {
            tracing::error!("Error opening/creating file {}", path.to_string_lossy());
            MirrorError::file_op(path, &e)
        })?;

    let mut bytes_written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
        dest_file
            .write_all(&chunk)
            .await
            .map_err(|e| MirrorError::file_op(path, &e))?;
        bytes_written += chunk.len() as u64;
    }
    dest_file
        .flush()
        .await
        .map_err(|e| MirrorError::file_op(path, &e))?;
    Ok(bytes_written)
}

/// Writes a page body that was already fetched (e.g. the result of a form
/// submission) to `path`, replacing whatever is there.
pub async fn write_page(path: &Path, body: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| MirrorError::file_op(path, &e))?;
    file.write_all(body.as_bytes())
        .await
        .map_err(|e| MirrorError::file_op(path, &e))?;
    file.flush().await.map_err(|e| MirrorError::file_op(path, &e))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Name for a downloaded resource with no name of its own: the
/// Content-Disposition file name when there is one, otherwise the url's.
fn resource_file_name(url: &str, headers: &HeaderMap) -> String {
    let from_header = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(file_name_from_content_disposition);
    match from_header {
        Some(name) => name,
        None => file_name_from_url(url, extension_for(headers)),
    }
}

/// File name advertised in a Content-Disposition header value, sanitized.
pub fn file_name_from_content_disposition(value: &str) -> Option<String> {
    let raw = if let Some(caps) = DISPOSITION_EXTENDED.captures(value) {
        urlencoding::decode(caps[2].trim())
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| caps[2].to_string())
    } else if let Some(caps) = DISPOSITION_QUOTED.captures(value) {
        caps[1].to_string()
    } else if let Some(caps) = DISPOSITION_BARE.captures(value) {
        caps[1].trim().to_string()
    } else {
        return None;
    };
    let name = sanitize_file_name(raw.trim_start());
    (!name.is_empty()).then_some(name)
}

/// File name derived from the last path segment of `url`. `fallback_ext` is
/// appended when the segment has no extension.
pub fn file_name_from_url(url: &str, fallback_ext: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = without_query.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(last_segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last_segment.to_string());
    // encoded slashes show up once decoded
    let mut name = decoded.rsplit('/').next().unwrap_or_default().to_string();
    if name.is_empty() {
        return DEFAULT_FILE_NAME.to_string();
    }
    if split_extension(&name).1.is_empty() {
        name.push_str(fallback_ext);
    }
    let name = sanitize_file_name(&name);
    if name.is_empty() || name == fallback_ext {
        DEFAULT_FILE_NAME.to_string()
    } else {
        name
    }
}

fn extension_for(headers: &HeaderMap) -> &'static str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| {
            // Remove charset if present (E.g text/html; charset=utf-8))
            let mime = ct.split(';').next().unwrap_or_default().trim().to_lowercase();
            MIME_TYPES.get(mime.as_str()).copied().unwrap_or(".html")
        })
        .unwrap_or(".html")
}

static MIME_TYPES: phf::Map<&'static str, &'static str> = phf_map! {
    "text/html" => ".html",
    "application/xhtml+xml" => ".xhtml",
    "text/plain" => ".txt",
    "application/pdf" => ".pdf",
    "application/zip" => ".zip",
    "application/vnd.ms-powerpoint" => ".ppt",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
    "application/x-subrip" => ".srt",
    "text/vtt" => ".vtt",
    "audio/mpeg" => ".mp3",
    "video/mp4" => ".mp4",
    "video/webm" => ".webm",
    "video/mpeg" => ".mpeg",
    "video/ogg" => ".ogv",
    "image/png" => ".png",
    "image/jpeg" => ".jpg",
};
