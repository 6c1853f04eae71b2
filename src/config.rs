use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{error, info};
use url::Url;

use crate::{
    extractor::{self, CookieSource},
    rate_limit,
};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_MAX_CONCURRENT_CONVERSIONS: usize = 3;
pub const COOKIES_FILE_NAME: &str = "yt_cookies.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub work_dir: PathBuf,
    pub allowed_origins: Option<HashSet<String>>,
    pub trust_proxy_headers: bool,
    pub max_concurrent_conversions: usize,
    pub rate_limit_max: usize,
    pub rate_limit_window_seconds: i64,
    pub extractor_bin: String,
    pub browser_cookies: Option<String>,
    /// Base64 encoded cookies.txt, decoded once by [`Config::prepare_cookies`].
    pub cookies_blob: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &str| lookup(name).and_then(|value| non_empty(&value));

        let bind_addr = read("APP_ADDR").unwrap_or_else(|| {
            let port = read("PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            format!("0.0.0.0:{port}")
        });

        let allowed_origins = read("ALLOWED_ORIGINS")
            .map(|value| parse_origins(&value))
            .transpose()?;

        Ok(Self {
            bind_addr,
            work_dir: read("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            allowed_origins,
            trust_proxy_headers: read("TRUST_PROXY_HEADERS")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
            max_concurrent_conversions: read("MAX_CONCURRENT_CONVERSIONS")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CONVERSIONS),
            rate_limit_max: read("RATE_LIMIT_MAX")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(rate_limit::DEFAULT_LIMIT),
            rate_limit_window_seconds: read("RATE_LIMIT_WINDOW_SECS")
                .and_then(|value| value.parse::<i64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(rate_limit::DEFAULT_WINDOW_SECONDS),
            extractor_bin: read("YT_DLP_BIN")
                .unwrap_or_else(|| extractor::DEFAULT_BINARY.to_string()),
            browser_cookies: read("USE_BROWSER_COOKIES"),
            cookies_blob: read("YT_COOKIES"),
        })
    }

    /// Decodes the cookie blob into the work directory and returns the cookie
    /// source for the extractor. A blob that fails to decode is logged and
    /// skipped so the server still starts.
    pub async fn prepare_cookies(&self) -> CookieSource {
        let file = match &self.cookies_blob {
            Some(blob) => match write_cookie_file(blob, &self.work_dir).await {
                Ok(path) => {
                    info!("YouTube cookies loaded from YT_COOKIES");
                    Some(path)
                }
                Err(error) => {
                    error!("Failed to load YT_COOKIES: {error:#}");
                    None
                }
            },
            None => None,
        };

        CookieSource {
            browser: self.browser_cookies.clone(),
            file,
        }
    }
}

async fn write_cookie_file(blob: &str, work_dir: &Path) -> Result<PathBuf> {
    let decoded = STANDARD
        .decode(blob.trim())
        .context("YT_COOKIES is not valid base64")?;
    let path = work_dir.join(COOKIES_FILE_NAME);
    tokio::fs::write(&path, decoded)
        .await
        .with_context(|| format!("Writing {}", path.display()))?;
    Ok(path)
}

fn parse_origins(value: &str) -> Result<HashSet<String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                anyhow!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                )
            })
        })
        .collect()
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
