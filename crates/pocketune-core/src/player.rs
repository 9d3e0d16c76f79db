//! Player actor.
//!
//! [`PlayerService`] owns a [`PlaybackEngine`] on a dedicated task. Intents and
//! device status ticks arrive through one mailbox, so a load or seek is always
//! fully applied before the next one starts and a newer request supersedes
//! whatever came before it. After every message the service publishes a
//! [`PlayerStatus`] on a `watch` channel, and on a fixed interval it
//! snapshots the play position.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::model::LibrarySong;
use crate::playback::{AudioDevice, DeviceStatus, PlaybackEngine, PlayerStatus};

/// Mailbox capacity.
const MAILBOX_CAPACITY: usize = 64;

/// Intents accepted by the player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Play a song.
    Play(LibrarySong),
    /// Play a queue entry by index.
    PlayIndex(usize),
    /// Replace the queue and play its head.
    SetQueue(Vec<LibrarySong>),
    /// Replace the queue with a shuffled copy and play its head.
    SetShuffleQueue(Vec<LibrarySong>),
    /// Pause or resume.
    PauseToggle,
    /// Move the play head, in seconds.
    Seek(f64),
    /// Next song.
    Next,
    /// Previous song or restart.
    Prev,
    /// Stop and forget the session.
    Stop,
    /// Stop and drop the queue.
    ClearQueue,
}

#[derive(Debug)]
enum Message {
    Command(PlayerCommand, Option<oneshot::Sender<bool>>),
    Device(DeviceStatus),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running player actor.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<Message>,
    status_rx: watch::Receiver<PlayerStatus>,
}

impl PlayerHandle {
    /// Send an intent and wait for its outcome.
    ///
    /// Returns `false` when the intent failed or the player is gone.
    pub async fn send(&self, command: PlayerCommand) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Message::Command(command, Some(reply_tx)))
            .await
            .is_err()
        {
            warn!("Player is not running");
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Send an intent without waiting for it.
    pub async fn dispatch(&self, command: PlayerCommand) {
        if self.tx.send(Message::Command(command, None)).await.is_err() {
            warn!("Player is not running");
        }
    }

    /// Forward a device status tick.
    pub async fn device_status(&self, status: DeviceStatus) {
        let _ = self.tx.send(Message::Device(status)).await;
    }

    /// Play a song.
    pub async fn play(&self, song: LibrarySong) -> bool {
        self.send(PlayerCommand::Play(song)).await
    }

    /// Play a queue entry by index.
    pub async fn play_index(&self, index: usize) -> bool {
        self.send(PlayerCommand::PlayIndex(index)).await
    }

    /// Replace the queue and play its head.
    pub async fn set_queue(&self, songs: Vec<LibrarySong>) -> bool {
        self.send(PlayerCommand::SetQueue(songs)).await
    }

    /// Shuffle, replace the queue and play its head.
    pub async fn set_shuffle_queue(&self, songs: Vec<LibrarySong>) -> bool {
        self.send(PlayerCommand::SetShuffleQueue(songs)).await
    }

    /// Pause or resume.
    pub async fn pause_toggle(&self) -> bool {
        self.send(PlayerCommand::PauseToggle).await
    }

    /// Move the play head.
    pub async fn seek(&self, position: f64) -> bool {
        self.send(PlayerCommand::Seek(position)).await
    }

    /// Next song.
    pub async fn next(&self) -> bool {
        self.send(PlayerCommand::Next).await
    }

    /// Previous song or restart.
    pub async fn prev(&self) -> bool {
        self.send(PlayerCommand::Prev).await
    }

    /// Stop and forget the session.
    pub async fn stop(&self) -> bool {
        self.send(PlayerCommand::Stop).await
    }

    /// Stop and drop the queue.
    pub async fn clear_queue(&self) -> bool {
        self.send(PlayerCommand::ClearQueue).await
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> PlayerStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.status_rx.clone()
    }

    /// Save the position one last time and stop the actor.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Runs a [`PlaybackEngine`] as an actor.
pub struct PlayerService<D: AudioDevice + 'static> {
    engine: PlaybackEngine<D>,
    rx: mpsc::Receiver<Message>,
    status_tx: watch::Sender<PlayerStatus>,
}

impl<D: AudioDevice + 'static> PlayerService<D> {
    /// Restore the persisted session and start the actor.
    pub fn spawn(mut engine: PlaybackEngine<D>) -> (PlayerHandle, JoinHandle<PlaybackEngine<D>>) {
        if engine.restore() {
            debug!("Player starts with a restored session");
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (status_tx, status_rx) = watch::channel(engine.status());
        let service = Self {
            engine,
            rx,
            status_tx,
        };
        let task = tokio::spawn(service.run());
        (PlayerHandle { tx, status_rx }, task)
    }

    async fn run(mut self) -> PlaybackEngine<D> {
        let period = self.engine.config().position_save_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(Message::Command(command, reply)) => {
                        let ok = self.apply(command);
                        self.publish();
                        if let Some(reply) = reply {
                            let _ = reply.send(ok);
                        }
                    }
                    Some(Message::Device(status)) => {
                        self.engine.on_status(status, Instant::now());
                        self.publish();
                    }
                    Some(Message::Shutdown(done)) => {
                        self.engine.save_position();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.engine.save_position();
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.engine.save_position();
                }
            }
        }
        info!("Player stopped");
        self.engine
    }

    fn apply(&mut self, command: PlayerCommand) -> bool {
        debug!("Player command: {:?}", command);
        let engine = &mut self.engine;
        match command {
            PlayerCommand::Play(song) => engine.play(song),
            PlayerCommand::PlayIndex(index) => engine.play_index(index),
            PlayerCommand::SetQueue(songs) => engine.set_queue(songs),
            PlayerCommand::SetShuffleQueue(songs) => engine.set_shuffle_queue(songs),
            PlayerCommand::PauseToggle => engine.pause_toggle(),
            PlayerCommand::Seek(position) => engine.seek(position),
            PlayerCommand::Next => engine.play_next(),
            PlayerCommand::Prev => engine.play_prev(),
            PlayerCommand::Stop => {
                engine.stop();
                true
            }
            PlayerCommand::ClearQueue => {
                engine.clear_queue();
                true
            }
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.engine.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::model::Track;
    use crate::playback::{MockAudioDevice, PLAYER_CURRENT_TIME_KEY, PlaybackState};
    use crate::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn song(id: &str) -> LibrarySong {
        LibrarySong::from_track(&Track::new(id, id), format!("memory://{id}.mp3"))
    }

    fn device() -> MockAudioDevice {
        let mut device = MockAudioDevice::new();
        device.expect_load().returning(|_| Ok(()));
        device.expect_play().returning(|| Ok(()));
        device.expect_pause().returning(|| Ok(()));
        device.expect_seek().returning(|_| Ok(()));
        device.expect_unload().returning(|| Ok(()));
        device.expect_is_playing().return_const(true);
        device
    }

    fn spawn(store: &MemoryStore) -> (PlayerHandle, JoinHandle<PlaybackEngine<MockAudioDevice>>) {
        let engine = PlaybackEngine::new(device(), Arc::new(store.clone()), PlayerConfig::default());
        PlayerService::spawn(engine)
    }

    #[tokio::test]
    async fn test_commands_publish_status() {
        let store = MemoryStore::new();
        let (player, _task) = spawn(&store);

        assert!(player.set_queue(vec![song("a"), song("b")]).await);
        assert_eq!(player.status().state, PlaybackState::Playing { index: 0 });

        assert!(player.next().await);
        assert_eq!(player.status().song.map(|s| s.id), Some("b".to_string()));

        assert!(!player.next().await);
        assert_eq!(player.status().state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_device_ticks_update_position() {
        let store = MemoryStore::new();
        let (player, _task) = spawn(&store);
        player.play(song("a")).await;

        player
            .device_status(DeviceStatus {
                playing: true,
                position: 42.0,
                duration: 180.0,
                finished: false,
            })
            .await;
        // Round-trip through the mailbox so the tick has been applied
        player.pause_toggle().await;

        let status = player.status();
        assert_eq!(status.current_time, 42.0);
        assert_eq!(status.duration, 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_is_saved_periodically() {
        let store = MemoryStore::new();
        let (player, _task) = spawn(&store);
        player.play(song("a")).await;
        player
            .device_status(DeviceStatus {
                playing: true,
                position: 10.0,
                duration: 180.0,
                finished: false,
            })
            .await;
        player.pause_toggle().await;

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            store.get(PLAYER_CURRENT_TIME_KEY).expect("get").as_deref(),
            Some("10")
        );
    }

    #[tokio::test]
    async fn test_shutdown_returns_engine() {
        let store = MemoryStore::new();
        let (player, task) = spawn(&store);
        player.play(song("a")).await;

        player.shutdown().await;
        let engine = task.await.expect("join");
        assert_eq!(engine.song_playing().map(|s| s.id.as_str()), Some("a"));
        assert!(!player.play(song("b")).await);
    }
}
