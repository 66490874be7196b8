use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Everything that can abort a waveform acquisition.
///
/// A failed acquisition never yields a placeholder waveform, so an all-zero trace always means the
/// instrument really reported zeros.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("transport failure during {step}: {source}")]
    Transport {
        step: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed preamble: {0}")]
    PreambleParse(String),

    #[error("curve payload holds {actual} bytes but {expected} were expected")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("malformed curve block header: {0}")]
    BlockHeader(String),

    #[error("instrument channel is already in use by another acquisition")]
    ChannelBusy,

    #[error("failed to release the instrument channel: {0}")]
    Close(#[source] io::Error),

    #[error("invalid acquisition settings: {0}")]
    Config(String),
}

impl AcquisitionError {
    pub(crate) fn transport(step: &str, source: io::Error) -> Self {
        AcquisitionError::Transport { step: step.to_owned(), source }
    }

    /// True when the failure was a read that ran past its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AcquisitionError::Transport { source, .. } if source.kind() == io::ErrorKind::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_names_the_step() {
        let err = AcquisitionError::transport("WFMPRe?", io::Error::new(io::ErrorKind::BrokenPipe, "port gone"));
        assert_eq!(err.to_string(), "transport failure during WFMPRe?: port gone");
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_is_detected_through_transport() {
        let err = AcquisitionError::transport("CURV?", io::Error::new(io::ErrorKind::TimedOut, "no data"));
        assert!(err.is_timeout());
        assert!(!AcquisitionError::ChannelBusy.is_timeout());
    }

    #[test]
    fn truncated_payload_reports_both_lengths() {
        let err = AcquisitionError::TruncatedPayload { expected: 5000, actual: 4999 };
        assert_eq!(err.to_string(), "curve payload holds 4999 bytes but 5000 were expected");
    }
}
