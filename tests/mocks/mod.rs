//! Fake extractor standing in for `yt-dlp` in router tests.

#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use yt2mp3::{
    extractor::{Extractor, ExtractorError, VideoMetadata},
    rate_limit::RateLimiter,
    server::AppState,
};

pub const MP3_BYTES: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00fake mpeg frames";

#[derive(Debug, Clone)]
pub enum DownloadBehavior {
    /// Writes `MP3_BYTES` where the extractor would put the MP3.
    WriteMp3,
    /// Reports success without producing a file.
    ProduceNothing,
    Fail(String),
}

#[derive(Debug)]
pub struct MockExtractor {
    metadata: Result<VideoMetadata, String>,
    download: DownloadBehavior,
    pub metadata_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    pub templates: Mutex<Vec<PathBuf>>,
}

impl MockExtractor {
    pub fn new(metadata: Result<VideoMetadata, String>, download: DownloadBehavior) -> Self {
        Self {
            metadata,
            download,
            metadata_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            templates: Mutex::new(Vec::new()),
        }
    }

    pub fn working() -> Self {
        Self::new(Ok(sample_metadata()), DownloadBehavior::WriteMp3)
    }

    pub fn total_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst) + self.download_calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn templates(&self) -> Vec<PathBuf> {
        self.templates.lock().unwrap().clone()
    }
}

pub fn sample_metadata() -> VideoMetadata {
    VideoMetadata {
        title: "Foo/Bar: <Live>!".to_string(),
        duration: 213,
        thumbnail: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string()),
        channel: Some("Rick Astley".to_string()),
    }
}

fn failure(diagnostic: &str) -> ExtractorError {
    ExtractorError::Failed {
        code: Some(1),
        diagnostic: diagnostic.to_string(),
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractorError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.metadata.clone().map_err(|diagnostic| failure(&diagnostic))
    }

    async fn download_audio(
        &self,
        url: &str,
        output_template: &Path,
    ) -> Result<(), ExtractorError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.templates
            .lock()
            .unwrap()
            .push(output_template.to_path_buf());

        match &self.download {
            DownloadBehavior::WriteMp3 => {
                let target = output_template.to_string_lossy().replace("%(ext)s", "mp3");
                tokio::fs::write(target, MP3_BYTES).await.unwrap();
                Ok(())
            }
            DownloadBehavior::ProduceNothing => Ok(()),
            DownloadBehavior::Fail(diagnostic) => {
                // A failed transcode can still leave a partial file behind.
                let target = output_template.to_string_lossy().replace("%(ext)s", "mp3");
                tokio::fs::write(target, b"partial").await.unwrap();
                Err(failure(diagnostic))
            }
        }
    }
}

pub fn state_with(extractor: Arc<MockExtractor>, work_dir: &Path, limiter: RateLimiter) -> AppState {
    AppState::new(extractor, limiter, work_dir.to_path_buf())
}
