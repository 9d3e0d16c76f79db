//! Library data model: remote tracks, downloaded songs and playlists.
//!
//! Field names serialize in camelCase so the persisted JSON matches what the
//! mobile app has always written (`channelTitle`, `fileUri`, `addedAt`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier shared by search results, downloads and library songs.
pub type TrackId = String;

/// Metadata for a remotely discoverable audio item, before download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Video identifier.
    pub id: TrackId,
    /// Display title.
    pub title: String,
    /// Channel/author label.
    #[serde(default)]
    pub channel_title: Option<String>,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Track {
    /// Create a track with just an id and a title.
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel_title: None,
            thumbnail: None,
            description: None,
        }
    }

    /// Set the channel label.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel_title = Some(channel.into());
        self
    }

    /// Set the thumbnail URL.
    #[must_use]
    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail = Some(url.into());
        self
    }
}

/// A downloaded track with its local file reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySong {
    /// Same identifier as the originating [`Track`].
    pub id: TrackId,
    /// Display title (HTML entities already decoded).
    pub title: String,
    /// Channel/author label.
    #[serde(default)]
    pub channel_title: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Reference into the blob store.
    pub file_uri: String,
    /// When the download completed.
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
    /// Whether the user starred this song.
    #[serde(default)]
    pub favorite: bool,
}

impl LibrarySong {
    /// Build a library entry for a freshly downloaded track.
    pub fn from_track(track: &Track, file_uri: impl Into<String>) -> Self {
        Self {
            id: track.id.clone(),
            title: html_decode(&track.title),
            channel_title: track.channel_title.clone(),
            description: track.description.clone(),
            thumbnail: track.thumbnail.clone(),
            file_uri: file_uri.into(),
            added_at: Utc::now(),
            favorite: false,
        }
    }

    /// Label shown for the artist, with a fallback for missing channels.
    #[must_use]
    pub fn artist(&self) -> &str {
        self.channel_title.as_deref().unwrap_or("Unknown artist")
    }
}

/// Named ordered collection of song identifiers.
///
/// Song ids are weak references: a deleted song may linger until the
/// deletion path scrubs it, so consumers must filter unresolved ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    /// Playlist identifier (UUID v4).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Cover image reference, empty when unset.
    #[serde(default)]
    pub image: String,
    /// Ordered song identifiers.
    #[serde(default)]
    pub songs: Vec<TrackId>,
}

impl Playlist {
    /// Whether the playlist references the given song.
    #[must_use]
    pub fn contains(&self, song_id: &str) -> bool {
        self.songs.iter().any(|id| id == song_id)
    }
}

/// Decode the HTML entities the search API leaves in titles.
#[must_use]
pub fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
