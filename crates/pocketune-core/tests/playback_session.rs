//! End-to-end behavior of the playback session engine and the player actor.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{DeviceCall, RecordingDevice, song};
use pocketune_core::{
    DeviceStatus, KeyValueStore, LibrarySong, MemoryStore, PLAYER_CURRENT_TIME_KEY,
    PLAYER_SONG_PLAYING_KEY, PLAYER_SONG_QUEUE_KEY, PlaybackEngine, PlaybackState, PlayerConfig,
    PlayerService,
};
use tokio::time::Instant;

fn engine(store: &MemoryStore) -> PlaybackEngine<RecordingDevice> {
    PlaybackEngine::new(
        RecordingDevice::new(),
        Arc::new(store.clone()),
        PlayerConfig::default(),
    )
}

fn tick(position: f64) -> DeviceStatus {
    DeviceStatus {
        playing: true,
        position,
        duration: 240.0,
        finished: false,
    }
}

fn ids(songs: &[LibrarySong]) -> Vec<&str> {
    songs.iter().map(|s| s.id.as_str()).collect()
}

fn assert_playing_song_is_queued(engine: &PlaybackEngine<RecordingDevice>) {
    if let (Some(queue), Some(playing)) = (engine.queue(), engine.song_playing()) {
        assert!(queue.iter().any(|s| s.id == playing.id));
    }
}

#[test]
fn test_next_moves_to_following_song() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    engine.set_queue(vec![song("song1"), song("song2")]);
    assert!(engine.play(song("song1")));
    engine.on_status(tick(12.0), Instant::now());

    assert!(engine.play_next());

    let status = engine.status();
    assert_eq!(status.song.map(|s| s.id), Some("song2".to_string()));
    assert_eq!(status.current_time, 0.0);
    assert!(!status.paused);
    let calls = engine.device().calls();
    assert_eq!(
        calls[calls.len() - 2..],
        [DeviceCall::Load("memory://song2.mp3".to_string()), DeviceCall::Play]
    );
}

#[test]
fn test_next_on_last_song_stops_and_forgets_session() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    assert!(engine.play(song("song1")));
    assert!(store.contains(PLAYER_SONG_PLAYING_KEY));

    assert!(!engine.play_next());

    assert_eq!(engine.state(), PlaybackState::Idle);
    assert!(engine.song_playing().is_none());
    assert!(!store.contains(PLAYER_SONG_QUEUE_KEY));
    assert!(!store.contains(PLAYER_SONG_PLAYING_KEY));
    assert!(!store.contains(PLAYER_CURRENT_TIME_KEY));
}

#[test]
fn test_prev_past_threshold_restarts_current_song() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    engine.set_queue(vec![song("a"), song("b")]);
    engine.play_next();
    engine.on_status(tick(45.0), Instant::now());
    engine.device().clear();

    assert!(engine.play_prev());

    assert_eq!(engine.song_playing().map(|s| s.id.as_str()), Some("b"));
    assert_eq!(engine.current_time(), 0.0);
    assert_eq!(engine.device().calls(), vec![DeviceCall::Seek(0.0)]);
}

#[test]
fn test_prev_early_in_song_goes_back() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    engine.set_queue(vec![song("a"), song("b")]);
    engine.play_next();
    engine.on_status(tick(5.0), Instant::now());

    assert!(engine.play_prev());
    assert_eq!(engine.song_playing().map(|s| s.id.as_str()), Some("a"));
}

#[test]
fn test_restore_lands_paused_at_saved_position() {
    let store = MemoryStore::new();
    let first = song("song1");
    store
        .set(
            PLAYER_SONG_PLAYING_KEY,
            &serde_json::to_string(&first).expect("json"),
        )
        .expect("playing");
    store.set(PLAYER_CURRENT_TIME_KEY, "83.5").expect("time");

    let mut engine = engine(&store);
    assert!(engine.restore());

    assert_eq!(engine.state(), PlaybackState::Paused { index: 0 });
    assert_eq!(engine.current_time(), 83.5);
    assert_eq!(
        engine.device().calls(),
        vec![
            DeviceCall::Load("memory://song1.mp3".to_string()),
            DeviceCall::Seek(83.5)
        ]
    );
    assert_eq!(engine.queue().map(ids), Some(vec!["song1"]));
}

#[test]
fn test_restore_failure_leaves_engine_idle() {
    let store = MemoryStore::new();
    store
        .set(
            PLAYER_SONG_PLAYING_KEY,
            &serde_json::to_string(&song("gone")).expect("json"),
        )
        .expect("playing");
    let device = RecordingDevice::new();
    device.fail_load("memory://gone.mp3");

    let mut engine = PlaybackEngine::new(device, Arc::new(store.clone()), PlayerConfig::default());
    assert!(!engine.restore());
    assert_eq!(engine.state(), PlaybackState::Idle);
}

#[test]
fn test_refused_play_is_not_resumed_on_relaunch() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    engine.device().fail_play();

    assert!(!engine.play(song("a")));
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert!(!store.contains(PLAYER_SONG_PLAYING_KEY));

    let mut relaunched = self::engine(&store);
    assert!(!relaunched.restore());
    assert_eq!(relaunched.state(), PlaybackState::Idle);
}

#[test]
fn test_failed_advance_forgets_previous_song() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);
    assert!(engine.set_queue(vec![song("a"), song("b")]));
    engine.on_status(tick(30.0), Instant::now());
    assert!(engine.save_position());
    engine.device().fail_load("memory://b.mp3");

    assert!(!engine.play_next());
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert!(!store.contains(PLAYER_SONG_PLAYING_KEY));
    assert!(!store.contains(PLAYER_CURRENT_TIME_KEY));

    let mut relaunched = self::engine(&store);
    assert!(!relaunched.restore());
    assert!(relaunched.song_playing().is_none());
}

#[test]
fn test_playing_song_always_belongs_to_queue() {
    let store = MemoryStore::new();
    let mut engine = engine(&store);

    engine.set_queue(vec![song("a"), song("b"), song("c")]);
    assert_playing_song_is_queued(&engine);
    engine.play(song("z"));
    assert_playing_song_is_queued(&engine);
    engine.set_shuffle_queue(vec![song("a"), song("b"), song("c")]);
    assert_playing_song_is_queued(&engine);
    engine.play_next();
    assert_playing_song_is_queued(&engine);
    engine.play_index(0);
    assert_playing_song_is_queued(&engine);
    engine.play_prev();
    assert_playing_song_is_queued(&engine);
    engine.stop();
    assert_playing_song_is_queued(&engine);
}

#[test]
fn test_shuffle_is_a_uniform_permutation() {
    let store = MemoryStore::new();
    let mut engine = engine(&store).with_shuffle_seed(7);
    let songs = vec![song("a"), song("b"), song("c")];
    let trials = 1200;

    let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
    for _ in 0..trials {
        assert!(engine.set_shuffle_queue(songs.clone()));
        let queue = engine.queue().expect("queue");
        assert_eq!(queue.len(), songs.len());
        let mut sorted = ids(queue);
        sorted.sort_unstable();
        assert_eq!(sorted, vec!["a", "b", "c"]);
        *counts
            .entry(queue.iter().map(|s| s.id.clone()).collect())
            .or_default() += 1;
    }

    assert_eq!(counts.len(), 6);
    for (order, count) in counts {
        assert!((100..=300).contains(&count), "{order:?} seen {count} times");
    }
}

#[tokio::test]
async fn test_player_service_resumes_and_persists_session() {
    let store = MemoryStore::new();

    let (player, task) = PlayerService::spawn(engine(&store));
    assert!(player.set_queue(vec![song("a"), song("b")]).await);
    assert!(player.next().await);
    player.device_status(tick(61.0)).await;
    assert!(player.pause_toggle().await);
    player.shutdown().await;
    task.await.expect("join");

    assert_eq!(
        store.get(PLAYER_CURRENT_TIME_KEY).expect("get").as_deref(),
        Some("61")
    );

    let (player, _task) = PlayerService::spawn(engine(&store));
    let status = player.status();
    assert_eq!(status.state, PlaybackState::Paused { index: 1 });
    assert_eq!(status.song.map(|s| s.id), Some("b".to_string()));
    assert_eq!(status.current_time, 61.0);
    assert!(status.has_previous);
    assert!(!status.has_next);
}

#[tokio::test]
async fn test_finished_track_advances_through_actor() {
    let store = MemoryStore::new();
    let (player, _task) = PlayerService::spawn(engine(&store));
    player.set_queue(vec![song("a"), song("b")]).await;

    player
        .device_status(DeviceStatus {
            playing: false,
            position: 240.0,
            duration: 240.0,
            finished: true,
        })
        .await;
    player.seek(0.0).await;

    let status = player.status();
    assert_eq!(status.song.map(|s| s.id), Some("b".to_string()));
    assert_eq!(status.current_index, Some(1));
}
