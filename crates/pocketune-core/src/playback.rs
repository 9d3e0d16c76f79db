//! Playback session engine.
//!
//! [`PlaybackEngine`] is a synchronous state machine that drives an
//! [`AudioDevice`] through a queue of library songs. The current track is
//! stored as an index into the queue, so "the playing song is part of the
//! queue" holds by construction. Queue and current song are persisted on
//! every change; the position is snapshotted separately by
//! [`PlaybackEngine::save_position`] so write volume stays bounded.
//!
//! The engine is single-owner: [`crate::player::PlayerService`] wraps it in
//! an actor so loads, seeks and device callbacks are applied one at a time.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::error::DeviceError;
use crate::model::LibrarySong;
use crate::store::{KeyValueStore, load_json, save_json};

/// Key holding the JSON array of queued songs.
pub const PLAYER_SONG_QUEUE_KEY: &str = "player_song_queue";

/// Key holding the JSON record of the current song.
pub const PLAYER_SONG_PLAYING_KEY: &str = "player_song_playing";

/// Key holding the last snapshotted position, in seconds.
pub const PLAYER_CURRENT_TIME_KEY: &str = "player_current_time";

/// Result of an audio device command.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// External audio decode/render engine.
#[cfg_attr(test, mockall::automock)]
pub trait AudioDevice: Send {
    /// Load a file reference, replacing nothing: callers unload first.
    fn load(&mut self, uri: &str) -> DeviceResult<()>;

    /// Start or resume playback of the loaded track.
    fn play(&mut self) -> DeviceResult<()>;

    /// Pause playback.
    fn pause(&mut self) -> DeviceResult<()>;

    /// Move the play head, in seconds.
    fn seek(&mut self, position: f64) -> DeviceResult<()>;

    /// Release the loaded track, if any.
    fn unload(&mut self) -> DeviceResult<()>;

    /// Whether audio is currently rendering.
    fn is_playing(&self) -> bool;
}

/// Status tick reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Audio is rendering.
    pub playing: bool,
    /// Play head in seconds.
    pub position: f64,
    /// Track length in seconds, 0 when unknown.
    pub duration: f64,
    /// The track played to its end.
    pub finished: bool,
}

/// Transport state. The index points into the play queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Track loaded, not rendering.
    Paused {
        /// Queue index of the loaded song.
        index: usize,
    },
    /// Track loaded and rendering.
    Playing {
        /// Queue index of the loaded song.
        index: usize,
    },
}

impl PlaybackState {
    /// Queue index of the loaded song.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Idle => None,
            Self::Paused { index } | Self::Playing { index } => Some(index),
        }
    }

    /// Whether audio should be rendering.
    #[must_use]
    pub const fn is_playing(self) -> bool {
        matches!(self, Self::Playing { .. })
    }
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlayerStatus {
    /// Transport state.
    pub state: PlaybackState,
    /// Loaded song.
    pub song: Option<LibrarySong>,
    /// Active play queue, `None` when no queue is loaded.
    pub queue: Option<Vec<LibrarySong>>,
    /// Queue index of the loaded song.
    pub current_index: Option<usize>,
    /// Play head in seconds.
    pub current_time: f64,
    /// Track length in seconds.
    pub duration: f64,
    /// Not rendering.
    pub paused: bool,
    /// A song follows the current one.
    pub has_next: bool,
    /// A song precedes the current one.
    pub has_previous: bool,
}

/// Outstanding manual seek.
#[derive(Debug, Clone, Copy)]
struct SeekToken {
    target: f64,
    issued_at: Instant,
}

/// Playback session state machine.
pub struct PlaybackEngine<D: AudioDevice> {
    device: D,
    store: Arc<dyn KeyValueStore>,
    config: PlayerConfig,
    queue: Option<Vec<LibrarySong>>,
    state: PlaybackState,
    current_time: f64,
    duration: f64,
    pending_seek: Option<SeekToken>,
    last_saved_time: Option<f64>,
    rng: StdRng,
}

impl<D: AudioDevice> PlaybackEngine<D> {
    /// Create an idle engine.
    pub fn new(device: D, store: Arc<dyn KeyValueStore>, config: PlayerConfig) -> Self {
        Self {
            device,
            store,
            config,
            queue: None,
            state: PlaybackState::Idle,
            current_time: 0.0,
            duration: 0.0,
            pending_seek: None,
            last_saved_time: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Use a fixed shuffle seed.
    #[must_use]
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Access the device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Player settings.
    pub const fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Current transport state.
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Play head in seconds.
    pub const fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Active play queue.
    pub fn queue(&self) -> Option<&[LibrarySong]> {
        self.queue.as_deref()
    }

    /// Loaded song.
    pub fn song_playing(&self) -> Option<&LibrarySong> {
        let index = self.state.index()?;
        self.queue.as_ref()?.get(index)
    }

    /// Snapshot for display.
    pub fn status(&self) -> PlayerStatus {
        let index = self.state.index();
        let len = self.queue.as_ref().map_or(0, Vec::len);
        PlayerStatus {
            state: self.state,
            song: self.song_playing().cloned(),
            queue: self.queue.clone(),
            current_index: index,
            current_time: self.current_time,
            duration: self.duration,
            paused: !self.state.is_playing(),
            has_next: index.is_some_and(|i| i + 1 < len),
            has_previous: index.is_some_and(|i| i > 0),
        }
    }

    /// Resume the persisted session, landing paused at the saved position.
    ///
    /// Returns whether a song was loaded.
    pub fn restore(&mut self) -> bool {
        let queue: Option<Vec<LibrarySong>> = load_json(self.store.as_ref(), PLAYER_SONG_QUEUE_KEY);
        let playing: Option<LibrarySong> = load_json(self.store.as_ref(), PLAYER_SONG_PLAYING_KEY);
        let saved_time = self
            .store
            .get(PLAYER_CURRENT_TIME_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t >= 0.0)
            .unwrap_or(0.0);

        self.queue = queue.filter(|q| !q.is_empty());
        let Some(song) = playing else {
            debug!("No playback session to restore");
            return false;
        };

        let index = match self.position_in_queue(&song.id) {
            Some(index) => index,
            None => {
                self.queue = Some(vec![song.clone()]);
                0
            }
        };

        if let Err(e) = self.device.load(&song.file_uri) {
            error!("Failed to restore {}: {}", song.id, e);
            self.go_idle();
            return false;
        }
        self.state = PlaybackState::Paused { index };
        self.current_time = 0.0;
        self.duration = 0.0;

        if saved_time > 0.0 {
            match self.device.seek(saved_time) {
                Ok(()) => {
                    self.current_time = saved_time;
                    self.pending_seek = Some(SeekToken {
                        target: saved_time,
                        issued_at: Instant::now(),
                    });
                }
                Err(e) => warn!("Failed to restore position {:.1}s: {}", saved_time, e),
            }
        }
        self.last_saved_time = Some(self.current_time);

        info!(
            "Restored session: {} at {:.1}s (paused)",
            song.id, self.current_time
        );
        true
    }

    /// Play a song. If it is already queued, jump to it, otherwise it
    /// becomes a single-song queue.
    pub fn play(&mut self, song: LibrarySong) -> bool {
        self.release_device();
        let index = match self.position_in_queue(&song.id) {
            Some(index) => index,
            None => {
                self.queue = Some(vec![song]);
                0
            }
        };
        self.start_at(index)
    }

    /// Play the song at `index` of the current queue.
    pub fn play_index(&mut self, index: usize) -> bool {
        if self.queue.as_ref().is_none_or(|q| index >= q.len()) {
            warn!("No song at queue index {}", index);
            return false;
        }
        self.release_device();
        self.start_at(index)
    }

    /// Replace the queue and play its first song. An empty list clears the queue.
    pub fn set_queue(&mut self, songs: Vec<LibrarySong>) -> bool {
        if songs.is_empty() {
            self.clear_queue();
            return false;
        }
        info!("Playing queue of {} songs", songs.len());
        self.release_device();
        self.queue = Some(songs);
        self.start_at(0)
    }

    /// [`PlaybackEngine::set_queue`] on a uniformly shuffled copy.
    pub fn set_shuffle_queue(&mut self, mut songs: Vec<LibrarySong>) -> bool {
        songs.shuffle(&mut self.rng);
        self.set_queue(songs)
    }

    /// Pause when playing, resume when paused. Does nothing when idle.
    pub fn pause_toggle(&mut self) -> bool {
        let Some(index) = self.state.index() else {
            return false;
        };
        if self.device.is_playing() {
            if let Err(e) = self.device.pause() {
                error!("Failed to pause: {}", e);
                return false;
            }
            self.state = PlaybackState::Paused { index };
        } else {
            if let Err(e) = self.device.play() {
                error!("Failed to resume: {}", e);
                self.state = PlaybackState::Paused { index };
                return false;
            }
            self.state = PlaybackState::Playing { index };
        }
        true
    }

    /// Move the play head. The position is updated right away; device ticks
    /// that disagree are ignored until the device catches up.
    pub fn seek(&mut self, position: f64) -> bool {
        if self.state == PlaybackState::Idle {
            return false;
        }
        let mut target = position.max(0.0);
        if self.duration > 0.0 {
            target = target.min(self.duration);
        }
        if let Err(e) = self.device.seek(target) {
            error!("Failed to seek: {}", e);
            self.pending_seek = None;
            return false;
        }
        debug!("Seeked to {:.1}s", target);
        self.current_time = target;
        self.pending_seek = Some(SeekToken {
            target,
            issued_at: Instant::now(),
        });
        true
    }

    /// Advance to the next song, or stop at the end of the queue.
    pub fn play_next(&mut self) -> bool {
        let next = match (self.state.index(), self.queue.as_ref()) {
            (Some(index), Some(queue)) if index + 1 < queue.len() => index + 1,
            _ => {
                debug!("End of queue, stopping");
                self.stop();
                return false;
            }
        };
        self.release_device();
        self.start_at(next)
    }

    /// Go back one song, or restart the current one when past the restart
    /// threshold or at the head of the queue.
    pub fn play_prev(&mut self) -> bool {
        let Some(index) = self.state.index() else {
            return false;
        };
        if self.current_time > self.config.restart_threshold_secs || index == 0 {
            return self.seek(0.0);
        }
        self.release_device();
        self.start_at(index - 1)
    }

    /// Stop playback and forget the persisted session. The in-memory queue stays.
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Idle
            && let Err(e) = self.device.pause()
        {
            warn!("Failed to pause before stopping: {}", e);
        }
        self.release_device();
        self.go_idle();
        for key in [PLAYER_SONG_QUEUE_KEY, PLAYER_SONG_PLAYING_KEY, PLAYER_CURRENT_TIME_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
        self.last_saved_time = None;
        info!("Playback stopped");
    }

    /// Stop playback and drop the queue.
    pub fn clear_queue(&mut self) {
        self.stop();
        self.queue = None;
    }

    /// Apply a device status tick.
    pub fn on_status(&mut self, status: DeviceStatus, now: Instant) {
        let Some(index) = self.state.index() else {
            return;
        };
        if status.finished {
            debug!("Track finished");
            self.play_next();
            return;
        }

        self.state = if status.playing {
            PlaybackState::Playing { index }
        } else {
            PlaybackState::Paused { index }
        };
        if status.duration.is_finite() && status.duration > 0.0 {
            self.duration = status.duration;
        }

        if let Some(token) = self.pending_seek {
            let settled = (status.position - token.target).abs() <= self.config.seek_settle_tolerance_secs;
            let expired = now.saturating_duration_since(token.issued_at) >= self.config.seek_settle_timeout();
            if !settled && !expired {
                return;
            }
            self.pending_seek = None;
        }
        self.current_time = status.position;
    }

    /// Snapshot the position if it moved far enough since the last snapshot.
    ///
    /// Returns whether a value was written.
    pub fn save_position(&mut self) -> bool {
        if self.state == PlaybackState::Idle {
            return false;
        }
        let drifted = self.last_saved_time.is_none_or(|last| {
            (self.current_time - last).abs() >= self.config.position_save_min_drift_secs
        });
        if !drifted {
            return false;
        }
        match self
            .store
            .set(PLAYER_CURRENT_TIME_KEY, &self.current_time.to_string())
        {
            Ok(()) => {
                self.last_saved_time = Some(self.current_time);
                true
            }
            Err(e) => {
                warn!("Failed to save playback position: {}", e);
                false
            }
        }
    }

    fn position_in_queue(&self, song_id: &str) -> Option<usize> {
        self.queue.as_ref()?.iter().position(|s| s.id == song_id)
    }

    /// Load and play the queue entry at `index`. The device must be empty.
    fn start_at(&mut self, index: usize) -> bool {
        let Some(song) = self.queue.as_ref().and_then(|q| q.get(index)).cloned() else {
            self.go_idle();
            return false;
        };

        if let Err(e) = self.device.load(&song.file_uri) {
            error!("Failed to load {}: {}", song.id, e);
            self.go_idle();
            self.forget_current();
            return false;
        }
        self.state = PlaybackState::Paused { index };
        self.current_time = 0.0;
        self.duration = 0.0;
        self.pending_seek = None;

        if let Err(e) = self.device.play() {
            error!("Failed to play {}: {}", song.id, e);
            self.release_device();
            self.go_idle();
            self.forget_current();
            return false;
        }
        self.state = PlaybackState::Playing { index };
        self.persist_session();
        self.last_saved_time = None;
        self.save_position();
        info!("Playing {} ({})", song.title, song.id);
        true
    }

    fn release_device(&mut self) {
        if let Err(e) = self.device.unload() {
            warn!("Failed to unload track: {}", e);
        }
    }

    fn go_idle(&mut self) {
        self.state = PlaybackState::Idle;
        self.current_time = 0.0;
        self.duration = 0.0;
        self.pending_seek = None;
    }

    /// Drop the persisted current song so a relaunch does not resume a
    /// track the device refused.
    fn forget_current(&mut self) {
        for key in [PLAYER_SONG_PLAYING_KEY, PLAYER_CURRENT_TIME_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
        self.last_saved_time = None;
    }

    fn persist_session(&self) {
        if let Some(queue) = &self.queue
            && let Err(e) = save_json(self.store.as_ref(), PLAYER_SONG_QUEUE_KEY, queue)
        {
            warn!("Failed to persist play queue: {}", e);
        }
        if let Some(song) = self.song_playing()
            && let Err(e) = save_json(self.store.as_ref(), PLAYER_SONG_PLAYING_KEY, song)
        {
            warn!("Failed to persist current song: {}", e);
        }
    }
}

impl<D: AudioDevice> std::fmt::Debug for PlaybackEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &self.state)
            .field("current_time", &self.current_time)
            .field("queue_len", &self.queue.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}
