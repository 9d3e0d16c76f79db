//! Pocketune Core Library
//!
//! This crate provides the core functionality for the Pocketune music app:
//! - A persistent, single-worker download queue that survives restarts
//! - A playback session engine that resumes where the user left off
//! - The library catalog of downloaded songs and playlists
//! - YouTube search and audio extraction collaborators
//! - Application configuration management
//!
//! # Error Handling
//!
//! Engines never let an [`Error`] escape to the user: failures are logged and
//! turned into notices or boolean results. See the [`error`] module for the
//! taxonomy and [`Error::user_message`] for the user-facing text.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pocketune_core::{ApiAudioSource, Catalog, DownloadQueue, FileStore, Track};
//!
//! let store = Arc::new(FileStore::new("/data/pocketune")?);
//! let catalog = Arc::new(Catalog::load(store.clone())?);
//! let queue = DownloadQueue::open(
//!     ApiAudioSource::new("https://audio.example")?,
//!     store,
//!     catalog,
//!     Default::default(),
//! );
//! queue.start().await;
//! queue.enqueue(Track::new("dQw4w9WgXcQ", "Never Gonna Give You Up")).await;
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod model;
pub mod playback;
pub mod player;
pub mod search;
pub mod source;
pub mod store;

pub use catalog::{Catalog, CatalogSnapshot, PLAYLISTS_BLOB, SONGS_BLOB};
pub use config::{
    AppConfig, ConfigManager, DownloadConfig, ExtractionBackend, PlayerConfig, ServicesConfig,
    default_data_directory,
};
pub use download::{
    DOWNLOAD_QUEUE_KEY, DOWNLOADING_ID_KEY, DownloadEvent, DownloadQueue, DownloadSnapshot,
    Notice, NoticeLevel, WorkerPhase, sanitize_file_stem,
};
pub use error::{DeviceError, DownloadError, Error, ErrorKind, Result, StorageError};
pub use model::{LibrarySong, Playlist, Track, TrackId, html_decode};
pub use playback::{
    AudioDevice, DeviceResult, DeviceStatus, PLAYER_CURRENT_TIME_KEY, PLAYER_SONG_PLAYING_KEY,
    PLAYER_SONG_QUEUE_KEY, PlaybackEngine, PlaybackState, PlayerStatus,
};
pub use player::{PlayerCommand, PlayerHandle, PlayerService};
pub use search::{LinkTarget, YouTubeSearch, parse_link};
pub use source::{ApiAudioSource, AudioSource, AudioStream, HttpAudioStream, YtdlAudioSource};
pub use store::{BlobStore, FileStore, KeyValueStore, MemoryStore};
