//! HTTP client for the two API calls the conversion flow makes.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::{StatusCode, header::CONTENT_DISPOSITION};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    extractor::VideoMetadata,
    flow::{ConversionFlow, Download, FlowError, FlowState},
};

pub const DEFAULT_SERVER: &str = "http://localhost:3001";
pub const DEFAULT_FILENAME: &str = "audio.mp3";

static DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename="?([^"]+)"?"#).expect("disposition regex is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    InvalidServer(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Api { status: StatusCode, message: String },
}

#[derive(Debug, Serialize)]
struct ReferencePayload<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(server)?,
        })
    }

    pub async fn fetch_info(&self, reference: &str) -> Result<VideoMetadata, ClientError> {
        let response = self
            .http
            .post(self.base.join("/api/info")?)
            .json(&ReferencePayload { url: reference })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response, "Could not fetch video info.").await);
        }

        Ok(response.json().await?)
    }

    pub async fn convert(&self, reference: &str) -> Result<Download, ClientError> {
        let response = self
            .http
            .post(self.base.join("/api/convert")?)
            .json(&ReferencePayload { url: reference })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response, "Conversion failed.").await);
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(filename_from_disposition)
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let payload = response.bytes().await?.to_vec();
        debug!("Received {} bytes as {filename:?}", payload.len());

        Ok(Download { filename, payload })
    }

    /// Runs the whole preview-then-convert flow for one reference, calling
    /// `observe` after every state change. Requests are never retried.
    pub async fn run_flow(
        &self,
        flow: &mut ConversionFlow,
        input: &str,
        mut observe: impl FnMut(&FlowState),
    ) -> Result<(), FlowError> {
        let submitted = flow.submit(input);
        observe(flow.state());
        let reference = submitted?;

        match self.fetch_info(&reference).await {
            Ok(metadata) => flow.preview_loaded(metadata)?,
            Err(error) => {
                flow.preview_failed(error.to_string())?;
                observe(flow.state());
                return Ok(());
            }
        }
        observe(flow.state());

        let reference = flow.start_conversion()?;
        observe(flow.state());

        match self.convert(&reference).await {
            Ok(download) => flow.converted(download)?,
            Err(error) => flow.conversion_failed(error.to_string())?,
        }
        observe(flow.state());

        Ok(())
    }
}

async fn api_error(response: reqwest::Response, fallback: &str) -> ClientError {
    let status = response.status();
    let message = response
        .json::<ErrorPayload>()
        .await
        .ok()
        .and_then(|payload| payload.error)
        .unwrap_or_else(|| fallback.to_string());
    ClientError::Api { status, message }
}

pub fn filename_from_disposition(disposition: &str) -> String {
    DISPOSITION_FILENAME
        .captures(disposition)
        .and_then(|captures| captures.get(1))
        .map(|encoded| {
            urlencoding::decode(encoded.as_str())
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| encoded.as_str().to_string())
        })
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_decoded_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"FooBar%20Live.mp3\""),
            "FooBar Live.mp3"
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=plain.mp3"),
            "plain.mp3"
        );
        assert_eq!(filename_from_disposition("attachment"), DEFAULT_FILENAME);
    }

    #[test]
    fn rejects_unparseable_server() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ClientError::InvalidServer(_))
        ));
    }
}
