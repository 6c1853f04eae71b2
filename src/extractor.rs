//! The media extraction capability and its `yt-dlp` implementation.
//!
//! Handlers only see the [`Extractor`] trait; the subprocess details (argument
//! vectors, cookies, timeouts, output caps) stay in this module.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    time::{Duration, timeout},
};
use tracing::{debug, warn};

pub const DEFAULT_BINARY: &str = "yt-dlp";
pub const EXTRACTOR_TIMEOUT_SECONDS: u64 = 300;
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Format preference applied before the audio stream is extracted.
pub const FORMAT_SORT: &str = "vcodec:h264,res:720,acodec:aac";

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("{program} is not installed. Install it and restart the server.")]
    NotInstalled { program: String },
    #[error("Could not run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Extractor timed out after {} seconds.", .0.as_secs())]
    Timeout(Duration),
    #[error("{diagnostic}")]
    Failed {
        /// `None` when the child was terminated by a signal.
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("Extractor output exceeded {limit} bytes.")]
    OutputTooLarge { limit: usize },
    #[error("Could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    /// Seconds.
    pub duration: u64,
    pub thumbnail: Option<String>,
    pub channel: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractorError>;

    /// Downloads `url` and transcodes it to MP3. `output_template` contains an
    /// `%(ext)s` placeholder the tool replaces with the final extension.
    async fn download_audio(&self, url: &str, output_template: &Path)
    -> Result<(), ExtractorError>;
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
}

impl From<YtDlpVideoInfo> for VideoMetadata {
    fn from(info: YtDlpVideoInfo) -> Self {
        let duration = info
            .duration
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .map(|seconds| seconds.round() as u64)
            .unwrap_or_default();

        Self {
            title: info.title.unwrap_or_default(),
            duration,
            thumbnail: info.thumbnail,
            channel: info
                .channel
                .filter(|value| !value.is_empty())
                .or(info.uploader),
        }
    }
}

pub fn parse_metadata(stdout: &[u8]) -> Result<VideoMetadata, ExtractorError> {
    let text = String::from_utf8_lossy(stdout);
    let info: YtDlpVideoInfo = serde_json::from_str(text.trim())?;
    Ok(info.into())
}

/// Where the extractor gets authentication cookies from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSource {
    pub browser: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(EXTRACTOR_TIMEOUT_SECONDS),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    base_args: Vec<String>,
    limits: RunLimits,
}

impl YtDlp {
    pub fn new(program: impl Into<String>, cookies: &CookieSource) -> Self {
        Self {
            program: program.into(),
            base_args: base_args(cookies),
            limits: RunLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn base_args(&self) -> &[String] {
        &self.base_args
    }

    async fn run(&self, mode_args: Vec<String>) -> Result<Vec<u8>, ExtractorError> {
        let mut args = self.base_args.clone();
        args.extend(mode_args);
        debug!("Running {} with args: {:?}", self.program, args);
        run_tool(&self.program, &args, self.limits).await
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractorError> {
        let stdout = self.run(metadata_args(url)).await?;
        parse_metadata(&stdout)
    }

    async fn download_audio(
        &self,
        url: &str,
        output_template: &Path,
    ) -> Result<(), ExtractorError> {
        self.run(download_args(url, output_template)).await?;
        Ok(())
    }
}

pub fn base_args(cookies: &CookieSource) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--no-check-formats".to_string(),
        "--extractor-args".to_string(),
        "youtube:player_client=ios,web".to_string(),
    ];

    if let Some(browser) = &cookies.browser {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.clone());
    }
    if let Some(file) = &cookies.file {
        args.push("--cookies".to_string());
        args.push(file.to_string_lossy().into_owned());
    }

    args
}

pub fn metadata_args(url: &str) -> Vec<String> {
    vec!["--dump-json".to_string(), url.to_string()]
}

pub fn download_args(url: &str, output_template: &Path) -> Vec<String> {
    vec![
        "-S".to_string(),
        FORMAT_SORT.to_string(),
        "-x".to_string(),
        "--audio-format".to_string(),
        "mp3".to_string(),
        "--audio-quality".to_string(),
        "0".to_string(),
        "-o".to_string(),
        output_template.to_string_lossy().into_owned(),
        url.to_string(),
    ]
}

/// Runs `program` with an argument vector and returns its stdout.
///
/// The child is killed if the timeout elapses or the caller is dropped.
pub async fn run_tool(
    program: &str,
    args: &[String],
    limits: RunLimits,
) -> Result<Vec<u8>, ExtractorError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ExtractorError::NotInstalled {
                    program: program.to_string(),
                }
            } else {
                ExtractorError::Spawn {
                    program: program.to_string(),
                    source,
                }
            }
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let completion = async {
        let (stdout, stderr) = tokio::join!(
            read_capped(stdout, limits.max_output_bytes),
            read_capped(stderr, limits.max_output_bytes),
        );
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    let (stdout, stderr, status) = timeout(limits.timeout, completion)
        .await
        .map_err(|_| {
            warn!("{program} timed out after {:?}", limits.timeout);
            ExtractorError::Timeout(limits.timeout)
        })?;

    let spawn_error = |source| ExtractorError::Spawn {
        program: program.to_string(),
        source,
    };
    let status = status.map_err(spawn_error)?;
    let stderr = stderr.map_err(spawn_error)?;
    let stdout = stdout.map_err(spawn_error)?;

    if !status.success() {
        let diagnostic = failure_diagnostic(&stderr.bytes, status);
        warn!("{program} failed ({status}): {diagnostic}");
        return Err(ExtractorError::Failed {
            code: status.code(),
            diagnostic,
        });
    }

    if stdout.truncated {
        return Err(ExtractorError::OutputTooLarge {
            limit: limits.max_output_bytes,
        });
    }

    Ok(stdout.bytes)
}

struct CappedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Keeps at most `limit` bytes but drains the pipe so the child never blocks.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<CappedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut output = CappedOutput {
        bytes: Vec::new(),
        truncated: false,
    };
    let Some(mut reader) = reader else {
        return Ok(output);
    };

    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(output.bytes.len());
        if read > room {
            output.truncated = true;
        }
        output.bytes.extend_from_slice(&buffer[..read.min(room)]);
    }

    Ok(output)
}

fn failure_diagnostic(stderr: &[u8], status: ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("Command failed: {status}")
    } else {
        trimmed.to_string()
    }
}
