//! Error types for Pocketune core operations.
//!
//! Errors are grouped by domain (downloads, the audio device, persistent
//! storage) so callers can decide how to surface them. Nothing in the engines
//! lets an [`Error`] escape to the user directly: it is logged and translated
//! into a short message with [`Error::user_message`].

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while fetching audio for a queued track.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The extraction service could not be reached or answered with an error.
    #[error("Audio extraction failed for {track_id}: {reason}")]
    ExtractionFailed {
        /// Track identifier.
        track_id: String,
        /// Underlying reason.
        reason: String,
    },

    /// The extraction service answered but did not provide a playable URL.
    #[error("No audio URL returned for {track_id}")]
    NoAudioUrl {
        /// Track identifier.
        track_id: String,
    },

    /// Network or storage failure while transferring bytes.
    #[error("Transfer failed for {track_id}: {reason}")]
    TransferFailed {
        /// Track identifier.
        track_id: String,
        /// Underlying reason.
        reason: String,
    },
}

/// Errors reported by the external audio device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device rejected a track.
    #[error("Failed to load {uri}: {reason}")]
    LoadFailed {
        /// File reference that was being loaded.
        uri: String,
        /// Underlying reason.
        reason: String,
    },

    /// The device refused to start playback.
    #[error("Failed to start playback: {0}")]
    PlayFailed(String),

    /// The device refused to pause.
    #[error("Failed to pause playback: {0}")]
    PauseFailed(String),

    /// The device refused to seek.
    #[error("Failed to seek to {position:.1}s: {reason}")]
    SeekFailed {
        /// Requested position in seconds.
        position: f64,
        /// Underlying reason.
        reason: String,
    },

    /// The device could not release the current track.
    #[error("Failed to unload track: {0}")]
    UnloadFailed(String),
}

/// Errors raised by the key/blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading a key or blob failed.
    #[error("Failed to read {key}: {reason}")]
    ReadFailed {
        /// Key or blob name.
        key: String,
        /// Underlying reason.
        reason: String,
    },

    /// Writing a key or blob failed.
    #[error("Failed to write {key}: {reason}")]
    WriteFailed {
        /// Key or blob name.
        key: String,
        /// Underlying reason.
        reason: String,
    },

    /// Deleting a key or blob failed.
    #[error("Failed to delete {key}: {reason}")]
    DeleteFailed {
        /// Key or blob name.
        key: String,
        /// Underlying reason.
        reason: String,
    },

    /// A required settings key has never been saved.
    #[error("{0} not found, please setup this key in settings menu.")]
    MissingKey(String),
}

/// Broad error categories, useful for choosing how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Download pipeline failure.
    Download,
    /// Audio device failure.
    Device,
    /// Key/blob store failure.
    Storage,
    /// A referenced song or playlist does not exist.
    NotFound,
    /// Search service failure.
    Search,
    /// Invalid or incomplete configuration.
    Configuration,
    /// Malformed persisted data.
    Serialization,
    /// Raw I/O failure.
    Io,
}

/// Errors that can occur in Pocketune core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Download pipeline error.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Audio device error.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Key/blob store error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Song not present in the library catalog.
    #[error("Song not found: {0}")]
    SongNotFound(String),

    /// Playlist not present in the library catalog.
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    /// Search/metadata service error.
    #[error("Search failed: {0}")]
    Search(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Download(_) => ErrorKind::Download,
            Self::Device(_) => ErrorKind::Device,
            Self::Storage(_) => ErrorKind::Storage,
            Self::SongNotFound(_) | Self::PlaylistNotFound(_) => ErrorKind::NotFound,
            Self::Search(_) => ErrorKind::Search,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the user can reasonably try the same action again.
    ///
    /// Download items are never retried automatically, but a manual
    /// re-enqueue after a network failure often succeeds.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Download(
                DownloadError::ExtractionFailed { .. } | DownloadError::TransferFailed { .. }
            ) | Self::Search(_)
        )
    }

    /// Short message suitable for an alert.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Download(_) => "Network error occurred".to_string(),
            Self::Device(_) => "Playback failed".to_string(),
            Self::SongNotFound(_) => "Song not found".to_string(),
            Self::PlaylistNotFound(_) => "Playlist not found".to_string(),
            Self::Storage(StorageError::MissingKey(_)) | Self::Configuration(_) => self.to_string(),
            Self::Search(_) => "Search failed, check your connection".to_string(),
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => {
                "Could not save your changes".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SongNotFound("abc123".to_string());
        assert_eq!(err.to_string(), "Song not found: abc123");
    }

    #[test]
    fn test_download_error_is_transparent() {
        let err: Error = DownloadError::NoAudioUrl {
            track_id: "vid1".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "No audio URL returned for vid1");
        assert_eq!(err.kind(), ErrorKind::Download);
    }

    #[test]
    fn test_download_failures_share_generic_message() {
        let extraction: Error = DownloadError::ExtractionFailed {
            track_id: "a".to_string(),
            reason: "503".to_string(),
        }
        .into();
        let transfer: Error = DownloadError::TransferFailed {
            track_id: "a".to_string(),
            reason: "reset".to_string(),
        }
        .into();
        assert_eq!(extraction.user_message(), "Network error occurred");
        assert_eq!(transfer.user_message(), "Network error occurred");
        assert!(extraction.is_retryable());
    }

    #[test]
    fn test_missing_key_message() {
        let err: Error = StorageError::MissingKey("youtube_api_key".to_string()).into();
        assert_eq!(
            err.user_message(),
            "youtube_api_key not found, please setup this key in settings menu."
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_kind() {
        assert_eq!(
            Error::PlaylistNotFound("p".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::PlaylistNotFound("p".to_string()).user_message(),
            "Playlist not found"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
