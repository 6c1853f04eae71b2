//! Two-step client flow: preview a reference, then convert it.
//!
//! The flow never issues requests itself; callers feed it the outcome of each
//! request and it decides what the user sees next.

use crate::{extractor::VideoMetadata, reference};

pub const VALIDATION_MESSAGE: &str = "Please enter a valid YouTube URL.";

/// A converted file held by the client until the user resets the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle {
        validation_error: Option<&'static str>,
    },
    /// `metadata` is `None` while the info request is in flight.
    Previewing {
        reference: String,
        metadata: Option<VideoMetadata>,
    },
    Converting {
        reference: String,
        metadata: VideoMetadata,
    },
    Ready {
        metadata: VideoMetadata,
        download: Download,
    },
    Failed {
        message: String,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "idle",
            Self::Previewing { .. } => "previewing",
            Self::Converting { .. } => "converting",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Please enter a valid YouTube URL.")]
    InvalidReference,
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFlow {
    state: FlowState,
}

impl Default for ConversionFlow {
    fn default() -> Self {
        Self {
            state: FlowState::Idle {
                validation_error: None,
            },
        }
    }
}

impl ConversionFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn download(&self) -> Option<&Download> {
        match &self.state {
            FlowState::Ready { download, .. } => Some(download),
            _ => None,
        }
    }

    fn invalid(&self, event: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            state: self.state.name(),
            event,
        }
    }

    /// Validates the reference locally and returns the trimmed reference to
    /// request metadata for. Invalid input keeps the flow idle with an inline
    /// validation error.
    pub fn submit(&mut self, input: &str) -> Result<String, FlowError> {
        if !matches!(self.state, FlowState::Idle { .. }) {
            return Err(self.invalid("submit"));
        }

        let trimmed = input.trim();
        if trimmed.is_empty() || !reference::is_accepted(trimmed) {
            self.state = FlowState::Idle {
                validation_error: Some(VALIDATION_MESSAGE),
            };
            return Err(FlowError::InvalidReference);
        }

        self.state = FlowState::Previewing {
            reference: trimmed.to_string(),
            metadata: None,
        };
        Ok(trimmed.to_string())
    }

    pub fn preview_loaded(&mut self, loaded: VideoMetadata) -> Result<(), FlowError> {
        if !matches!(self.state, FlowState::Previewing { metadata: None, .. }) {
            return Err(self.invalid("show a preview"));
        }
        if let FlowState::Previewing { metadata, .. } = &mut self.state {
            *metadata = Some(loaded);
        }
        Ok(())
    }

    pub fn preview_failed(&mut self, message: impl Into<String>) -> Result<(), FlowError> {
        if !matches!(self.state, FlowState::Previewing { .. }) {
            return Err(self.invalid("fail a preview"));
        }
        self.state = FlowState::Failed {
            message: message.into(),
        };
        Ok(())
    }

    /// Moves a loaded preview into conversion and returns the reference to
    /// convert.
    pub fn start_conversion(&mut self) -> Result<String, FlowError> {
        let FlowState::Previewing {
            reference,
            metadata: Some(metadata),
        } = &self.state
        else {
            return Err(self.invalid("start a conversion"));
        };

        let reference = reference.clone();
        self.state = FlowState::Converting {
            reference: reference.clone(),
            metadata: metadata.clone(),
        };
        Ok(reference)
    }

    pub fn converted(&mut self, download: Download) -> Result<(), FlowError> {
        let FlowState::Converting { metadata, .. } = &self.state else {
            return Err(self.invalid("finish a conversion"));
        };

        self.state = FlowState::Ready {
            metadata: metadata.clone(),
            download,
        };
        Ok(())
    }

    pub fn conversion_failed(&mut self, message: impl Into<String>) -> Result<(), FlowError> {
        if !matches!(self.state, FlowState::Converting { .. }) {
            return Err(self.invalid("fail a conversion"));
        }
        self.state = FlowState::Failed {
            message: message.into(),
        };
        Ok(())
    }

    /// Returns to idle, dropping any held download.
    pub fn reset(&mut self) -> Result<(), FlowError> {
        if !matches!(
            self.state,
            FlowState::Ready { .. } | FlowState::Failed { .. }
        ) {
            return Err(self.invalid("reset"));
        }
        self.state = FlowState::Idle {
            validation_error: None,
        };
        Ok(())
    }
}

/// Renders seconds as `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://youtu.be/dQw4w9WgXcQ";

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "Never Gonna Give You Up".to_string(),
            duration: 213,
            thumbnail: None,
            channel: Some("Rick Astley".to_string()),
        }
    }

    fn download() -> Download {
        Download {
            filename: "Never Gonna Give You Up.mp3".to_string(),
            payload: vec![0xFF, 0xFB, 0x90],
        }
    }

    #[test]
    fn happy_path_reaches_ready_and_resets() {
        let mut flow = ConversionFlow::new();

        assert_eq!(flow.submit(&format!("  {URL} ")).unwrap(), URL);
        flow.preview_loaded(metadata()).unwrap();
        assert_eq!(flow.start_conversion().unwrap(), URL);
        assert_eq!(flow.state().name(), "converting");

        flow.converted(download()).unwrap();
        assert_eq!(flow.download(), Some(&download()));

        flow.reset().unwrap();
        assert_eq!(
            flow.state(),
            &FlowState::Idle {
                validation_error: None
            }
        );
        assert_eq!(flow.download(), None);
    }

    #[test]
    fn invalid_reference_stays_idle_with_inline_error() {
        let mut flow = ConversionFlow::new();

        assert_eq!(
            flow.submit("https://example.com/video"),
            Err(FlowError::InvalidReference)
        );
        assert_eq!(
            flow.state(),
            &FlowState::Idle {
                validation_error: Some(VALIDATION_MESSAGE)
            }
        );

        assert!(flow.submit(URL).is_ok());
    }

    #[test]
    fn failures_are_resettable() {
        let mut flow = ConversionFlow::new();
        flow.submit(URL).unwrap();
        flow.preview_failed("Video unavailable").unwrap();
        assert_eq!(
            flow.state(),
            &FlowState::Failed {
                message: "Video unavailable".to_string()
            }
        );
        flow.reset().unwrap();

        flow.submit(URL).unwrap();
        flow.preview_loaded(metadata()).unwrap();
        flow.start_conversion().unwrap();
        flow.conversion_failed("Conversion failed.").unwrap();
        assert_eq!(flow.state().name(), "failed");
        flow.reset().unwrap();
        assert_eq!(flow.state().name(), "idle");
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut flow = ConversionFlow::new();

        assert_eq!(
            flow.start_conversion(),
            Err(FlowError::InvalidTransition {
                state: "idle",
                event: "start a conversion"
            })
        );
        assert!(flow.reset().is_err());

        flow.submit(URL).unwrap();
        assert!(flow.start_conversion().is_err(), "preview not loaded yet");
        assert!(flow.submit(URL).is_err(), "no parallel requests");
        assert!(flow.converted(download()).is_err());
        assert_eq!(flow.state().name(), "previewing");
    }

    #[test]
    fn durations_render_like_a_player() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(9), "0:09");
        assert_eq!(format_duration(213), "3:33");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3725), "1:02:05");
    }
}
