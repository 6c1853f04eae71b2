//! Temporary conversion output owned by a single convert request.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ARTIFACT_PREFIX: &str = "yt2mp3_";
pub const AUDIO_EXTENSION: &str = "mp3";
pub const DEFAULT_TITLE: &str = "audio";

/// Paths of one conversion: the template handed to the extractor and the
/// file it is expected to produce.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub id: String,
    pub output_template: PathBuf,
    pub expected_file: PathBuf,
}

impl ArtifactPaths {
    pub fn generate(work_dir: &Path) -> Self {
        let id = Uuid::new_v4().simple().to_string()[..16].to_string();
        Self::with_id(work_dir, id)
    }

    pub fn with_id(work_dir: &Path, id: String) -> Self {
        let stem = format!("{ARTIFACT_PREFIX}{id}");
        Self {
            output_template: work_dir.join(format!("{stem}.%(ext)s")),
            expected_file: work_dir.join(format!("{stem}.{AUDIO_EXTENSION}")),
            id,
        }
    }
}

/// Removes the artifact file when dropped, unless it was already removed.
///
/// Stream bodies hold the guard, so the file goes away once the response
/// finishes, fails, or is abandoned by the client.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: Option<PathBuf>,
    streamed_bytes: u64,
}

impl ArtifactGuard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            streamed_bytes: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record_chunk(&mut self, len: usize) {
        self.streamed_bytes += len as u64;
    }

    /// Deletes the file. Returns `false` when the guard had already released
    /// it; deletion errors are logged and swallowed.
    pub fn release(&mut self) -> bool {
        let Some(path) = self.path.take() else {
            return false;
        };

        match std::fs::remove_file(&path) {
            Ok(()) => debug!(
                "Removed artifact {:?} after streaming {} bytes",
                path, self.streamed_bytes
            ),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!("Artifact {:?} was never created", path)
            }
            Err(error) => debug!("Could not remove artifact {:?}: {error}", path),
        }
        true
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Keeps word characters, whitespace, hyphens, brackets and parentheses.
pub fn sanitize_title(title: &str) -> String {
    let sanitized = title
        .chars()
        .filter(|character| {
            character.is_ascii_alphanumeric()
                || character.is_whitespace()
                || matches!(character, '_' | '-' | '(' | ')' | '[' | ']')
        })
        .collect::<String>();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn content_disposition(safe_title: &str) -> String {
    format!(
        "attachment; filename=\"{}.{AUDIO_EXTENSION}\"",
        urlencoding::encode(safe_title)
    )
}

/// Removes artifacts left behind by a previous process.
pub async fn cleanup_stale_artifacts(work_dir: &Path, older_than: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open work directory for cleanup: {error}");
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate work directory for cleanup: {error}");
                break;
            }
        };

        let is_artifact = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX));
        if !is_artifact {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale artifact {:?}: {error}", path),
        }
    }

    if removed > 0 {
        info!("Removed {removed} stale artifact(s) from {:?}", work_dir);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_strips_disallowed_punctuation() {
        assert_eq!(sanitize_title("Foo/Bar: <Live>!"), "FooBar Live");
        assert_eq!(
            sanitize_title("  Track_01 - Intro (Remix) [HD]  "),
            "Track_01 - Intro (Remix) [HD]"
        );
        assert_eq!(sanitize_title("Café \"quoted\"; rm -rf"), "Caf quoted rm -rf");
    }

    #[test]
    fn sanitize_falls_back_when_nothing_survives() {
        assert_eq!(sanitize_title(""), DEFAULT_TITLE);
        assert_eq!(sanitize_title("!!! ??? ..."), DEFAULT_TITLE);
        assert_eq!(sanitize_title("日本語"), DEFAULT_TITLE);
    }

    #[test]
    fn disposition_carries_encoded_mp3_name() {
        assert_eq!(
            content_disposition("FooBar Live"),
            "attachment; filename=\"FooBar%20Live.mp3\""
        );
    }

    #[test]
    fn paths_share_the_random_identifier() {
        let paths = ArtifactPaths::generate(Path::new("/tmp/work"));
        assert_eq!(paths.id.len(), 16);
        assert!(paths.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            paths.output_template,
            PathBuf::from(format!("/tmp/work/yt2mp3_{}.%(ext)s", paths.id))
        );
        assert_eq!(
            paths.expected_file,
            PathBuf::from(format!("/tmp/work/yt2mp3_{}.mp3", paths.id))
        );

        let other = ArtifactPaths::generate(Path::new("/tmp/work"));
        assert_ne!(paths.id, other.id);
    }

    #[test]
    fn guard_releases_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("yt2mp3_test.mp3");
        std::fs::write(&file, b"audio").unwrap();

        let mut guard = ArtifactGuard::new(file.clone());
        assert!(guard.release());
        assert!(!file.exists());
        assert!(!guard.release());
        assert_eq!(guard.path(), None);
    }

    #[test]
    fn guard_removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("yt2mp3_drop.mp3");
        std::fs::write(&file, b"audio").unwrap();

        drop(ArtifactGuard::new(file.clone()));
        assert!(!file.exists());
    }

    #[test]
    fn guard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = ArtifactGuard::new(dir.path().join("never-created.mp3"));
        assert!(guard.release());
    }

    #[tokio::test]
    async fn stale_cleanup_only_touches_old_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yt2mp3_old.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"b").unwrap();

        assert_eq!(
            cleanup_stale_artifacts(dir.path(), Duration::from_secs(3600)).await,
            0
        );
        assert_eq!(cleanup_stale_artifacts(dir.path(), Duration::ZERO).await, 1);
        assert!(!dir.path().join("yt2mp3_old.mp3").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
