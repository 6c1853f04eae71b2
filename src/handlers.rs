use std::io::ErrorKind;

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::{
    artifact::{self, ArtifactGuard, ArtifactPaths},
    error::ApiError,
    extractor::VideoMetadata,
    reference::{self, NormalizedReference},
    server::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

fn parse_reference(
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<NormalizedReference, ApiError> {
    let Json(payload) = payload?;
    let reference = reference::normalize(payload.url.as_deref().unwrap_or_default())?;
    info!("Clean URL: {}", reference.url());
    Ok(reference)
}

pub async fn fetch_info(
    State(state): State<AppState>,
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let reference = parse_reference(payload)?;

    let metadata = state
        .extractor
        .fetch_metadata(reference.url())
        .await
        .inspect_err(|error| warn!("Info lookup failed for {}: {error}", reference.url()))?;

    Ok(Json(metadata))
}

pub async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ReferenceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let reference = parse_reference(payload)?;
    let url = reference.url();

    let _conversion_permit = state
        .conversion_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve conversion capacity."))?;

    let paths = ArtifactPaths::generate(&state.work_dir);
    // Armed before the extractor runs so every early return removes the file.
    let mut guard = ArtifactGuard::new(paths.expected_file.clone());

    let metadata = state
        .extractor
        .fetch_metadata(url)
        .await
        .inspect_err(|error| warn!("Title lookup failed for {url}: {error}"))?;
    let safe_title = artifact::sanitize_title(&metadata.title);

    state
        .extractor
        .download_audio(url, &paths.output_template)
        .await
        .inspect_err(|error| warn!("Conversion failed for {url}: {error}"))?;

    let file = match tokio::fs::File::open(&paths.expected_file).await {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            warn!(
                "Converted file {:?} not found after extractor reported success",
                paths.expected_file
            );
            return Err(ApiError::artifact_missing());
        }
        Err(error) => {
            return Err(ApiError::internal(format!(
                "Could not read converted file: {error}"
            )));
        }
    };
    let content_length = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("Could not read converted file: {error}")))?
        .len();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&artifact::content_disposition(&safe_title))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    info!(
        "Streaming {:?} ({content_length} bytes) as {safe_title:?}",
        paths.expected_file
    );

    let stream = ReaderStream::new(file).map(move |chunk| {
        match &chunk {
            Ok(bytes) => guard.record_chunk(bytes.len()),
            Err(error) => warn!("Error streaming file {:?}: {error}", guard.path()),
        }
        chunk
    });

    Ok((headers, Body::from_stream(stream)).into_response())
}
