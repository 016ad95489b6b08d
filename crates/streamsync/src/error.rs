use serde::{Deserialize, Serialize};

use crate::source::SourceState;

/// Classification of the failures the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Manifest or segment fetch/parse failure. Fatal for the affected stream only.
    LoadError,
    /// The environment refused to start playback (e.g. autoplay policy).
    PlaybackBlocked,
    /// The stream list could not be fetched or parsed.
    TransportError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadError => "LOAD_ERROR",
            Self::PlaybackBlocked => "PLAYBACK_BLOCKED",
            Self::TransportError => "TRANSPORT_ERROR",
        }
    }

    /// Only load errors move a stream into the `Error` state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LoadError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("load error on stream `{stream_id}`: {reason}")]
    Load { stream_id: String, reason: String },

    #[error("playback blocked on stream `{stream_id}`: {reason}")]
    PlaybackBlocked { stream_id: String, reason: String },

    #[error("stream list fetch failed: {reason}")]
    Transport { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("unknown stream `{stream_id}`")]
    UnknownStream { stream_id: String },

    #[error("invalid stream descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    #[error("stream `{stream_id}` cannot {operation} while {state}")]
    InvalidState {
        stream_id: String,
        operation: &'static str,
        state: SourceState,
    },

    #[error("no active sync session")]
    NoActiveSession,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("sync service is not running")]
    ServiceClosed,
}

impl SyncError {
    pub fn load(stream_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            stream_id: stream_id.into(),
            reason: reason.into(),
        }
    }

    pub fn playback_blocked(stream_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PlaybackBlocked {
            stream_id: stream_id.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn unknown_stream(stream_id: impl Into<String>) -> Self {
        Self::UnknownStream {
            stream_id: stream_id.into(),
        }
    }

    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        stream_id: impl Into<String>,
        operation: &'static str,
        state: SourceState,
    ) -> Self {
        Self::InvalidState {
            stream_id: stream_id.into(),
            operation,
            state,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Maps the error onto the engine's error taxonomy, if it belongs to it.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Load { .. } => Some(ErrorKind::LoadError),
            Self::PlaybackBlocked { .. } => Some(ErrorKind::PlaybackBlocked),
            Self::Transport { .. } | Self::Network { .. } => Some(ErrorKind::TransportError),
            Self::UnknownStream { .. }
            | Self::InvalidDescriptor { .. }
            | Self::InvalidState { .. }
            | Self::NoActiveSession
            | Self::Configuration { .. }
            | Self::ServiceClosed => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_fatal())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
