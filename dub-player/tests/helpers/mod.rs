//! Test helpers for dub-player integration tests
//!
//! Provides in-memory collaborators for driving a full session:
//! - FakeBackend: scripted manifest and segment provider
//! - RecordingSink: asynchronous sink that records appends
//! - EventLog: bus subscriber with wait helpers

#![allow(dead_code)]

use async_trait::async_trait;
use dub_common::events::{DubEvent, EventBus};
use dub_player::playback::{
    BufferedRange, MediaSink, SimulatedClock, SinkError, SinkEvent, SinkEvents, SinkState,
};
use dub_player::segment::{
    Manifest, ManifestProvider, MediaId, ProviderError, SegmentBuffer, SegmentFetch, SegmentId,
    SegmentKey, SegmentProvider,
};
use dub_player::{Session, SessionConfig, SessionHandle, SessionParams};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const MEDIA: &str = "vid";

pub fn sid(key: u64) -> SegmentId {
    SegmentId::derive(&MediaId::new(MEDIA), &SegmentKey::new(key.to_string()))
}

// ------------------------------------------------------------------------------------------------
// FakeBackend
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct BackendScript {
    /// Remaining failures per id before it succeeds
    failures: HashMap<SegmentId, u32>,
    /// Ids that never succeed
    broken: Vec<SegmentId>,
    /// Every provider call, in order
    calls: Vec<Vec<SegmentId>>,
}

/// Scripted provider; segment bytes are the segment id
#[derive(Clone)]
pub struct FakeBackend {
    keys: Option<Vec<u64>>,
    latency: Duration,
    script: Arc<Mutex<BackendScript>>,
}

impl FakeBackend {
    pub fn new(keys: &[u64]) -> Self {
        Self {
            keys: Some(keys.to_vec()),
            latency: Duration::from_millis(50),
            script: Arc::new(Mutex::new(BackendScript::default())),
        }
    }

    /// Backend whose manifest call fails
    pub fn without_manifest() -> Self {
        Self {
            keys: None,
            ..Self::new(&[])
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `key` fails its first `times` requests
    pub fn fail_times(self, key: u64, times: u32) -> Self {
        self.script.lock().unwrap().failures.insert(sid(key), times);
        self
    }

    /// `key` always fails
    pub fn broken(self, key: u64) -> Self {
        self.script.lock().unwrap().broken.push(sid(key));
        self
    }

    pub fn calls(&self) -> Vec<Vec<SegmentId>> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Number of calls that asked for `key`
    pub fn requests_for(&self, key: u64) -> usize {
        let id = sid(key);
        self.calls()
            .iter()
            .filter(|batch| batch.contains(&id))
            .count()
    }
}

#[async_trait]
impl ManifestProvider for FakeBackend {
    async fn fetch_manifest(&self, media_id: &MediaId) -> Result<Manifest, ProviderError> {
        match &self.keys {
            Some(keys) => Ok(Manifest::new(
                media_id.clone(),
                keys.iter().map(|k| SegmentKey::new(k.to_string())).collect(),
                true,
            )),
            None => Err(ProviderError::Status(503)),
        }
    }
}

#[async_trait]
impl SegmentProvider for FakeBackend {
    async fn fetch_segments(
        &self,
        _media_id: &MediaId,
        ids: &[SegmentId],
        _needs_translation: bool,
    ) -> Result<Vec<SegmentFetch>, ProviderError> {
        self.script.lock().unwrap().calls.push(ids.to_vec());
        tokio::time::sleep(self.latency).await;

        let mut script = self.script.lock().unwrap();
        let mut results = Vec::new();
        for id in ids {
            if script.broken.contains(id) {
                results.push(SegmentFetch::failed(
                    id.clone(),
                    ProviderError::Failed("tts failed".to_string()),
                ));
                continue;
            }
            if let Some(remaining) = script.failures.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    // Leave it out of the response entirely
                    continue;
                }
            }
            results.push(SegmentFetch::ready(
                id.clone(),
                SegmentBuffer::new(id.as_str().as_bytes().to_vec()),
            ));
        }
        // Reverse so callers cannot rely on response order
        results.reverse();
        Ok(results)
    }
}

// ------------------------------------------------------------------------------------------------
// RecordingSink
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct SinkShared {
    state: Option<SinkState>,
    appended: Vec<String>,
    /// Appends submitted while another was outstanding
    overlaps: usize,
    /// Next N appends report an asynchronous error
    fail_next: usize,
    ended: bool,
}

/// Sink completing each append after a short delay
#[derive(Clone)]
pub struct RecordingSink {
    shared: Arc<Mutex<SinkShared>>,
    events: Option<SinkEvents>,
    latency: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SinkShared::default())),
            events: None,
            latency: Duration::from_millis(10),
        }
    }

    pub fn fail_next_appends(self, count: usize) -> Self {
        self.shared.lock().unwrap().fail_next = count;
        self
    }

    /// Successfully appended segment ids, in order
    pub fn appended(&self) -> Vec<String> {
        self.shared.lock().unwrap().appended.clone()
    }

    pub fn overlaps(&self) -> usize {
        self.shared.lock().unwrap().overlaps
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().unwrap().ended
    }
}

impl MediaSink for RecordingSink {
    fn attach(&mut self, events: SinkEvents) {
        self.shared.lock().unwrap().state = Some(SinkState::Open);
        events.emit(SinkEvent::Open);
        self.events = Some(events);
    }

    fn state(&self) -> SinkState {
        self.shared
            .lock()
            .unwrap()
            .state
            .unwrap_or(SinkState::Closed)
    }

    fn append(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let mut shared = self.shared.lock().unwrap();
        match shared.state {
            Some(SinkState::Open) => {}
            Some(SinkState::Updating) => {
                shared.overlaps += 1;
                return Err(SinkError::Busy);
            }
            _ => return Err(SinkError::NotOpen),
        }
        shared.state = Some(SinkState::Updating);

        let fail = shared.fail_next > 0;
        if fail {
            shared.fail_next -= 1;
        }
        drop(shared);

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let data = String::from_utf8_lossy(data).to_string();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            {
                let mut shared = shared.lock().unwrap();
                shared.state = Some(SinkState::Open);
                if !fail {
                    shared.appended.push(data);
                }
            }
            if let Some(events) = events {
                if fail {
                    events.emit(SinkEvent::Error("append failed".to_string()));
                } else {
                    events.emit(SinkEvent::UpdateEnd);
                }
            }
        });
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        let mut shared = self.shared.lock().unwrap();
        shared.state = Some(SinkState::Ended);
        shared.ended = true;
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        let end: u64 = self
            .shared
            .lock()
            .unwrap()
            .appended
            .iter()
            .map(|data| data.len() as u64)
            .sum();
        vec![BufferedRange { start: 0, end }]
    }
}

// ------------------------------------------------------------------------------------------------
// EventLog
// ------------------------------------------------------------------------------------------------

/// Collects bus events for assertions
pub struct EventLog {
    rx: broadcast::Receiver<DubEvent>,
    pub seen: Vec<DubEvent>,
}

impl EventLog {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe(),
            seen: Vec::new(),
        }
    }

    /// Wait for the first event (seen or future) matching `pred`
    pub async fn wait_for<F>(&mut self, pred: F) -> DubEvent
    where
        F: Fn(&DubEvent) -> bool,
    {
        if let Some(event) = self.seen.iter().find(|e| pred(e)) {
            return event.clone();
        }
        let deadline = Duration::from_secs(120);
        tokio::time::timeout(deadline, async {
            loop {
                let event = self.rx.recv().await.expect("event bus closed");
                self.seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Pull in everything published so far
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn count<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&DubEvent) -> bool,
    {
        self.drain();
        self.seen.iter().filter(|e| pred(e)).count()
    }
}

// ------------------------------------------------------------------------------------------------
// Session harness
// ------------------------------------------------------------------------------------------------

/// A running session plus handles on all of its collaborators
pub struct Harness {
    pub handle: SessionHandle,
    pub backend: FakeBackend,
    pub sink: RecordingSink,
    pub primary: SimulatedClock,
    pub secondary: SimulatedClock,
    pub events: EventLog,
}

pub async fn start_session(window: usize, backend: FakeBackend, sink: RecordingSink) -> Harness {
    let bus = Arc::new(EventBus::new(1024));
    let events = EventLog::new(&bus);
    let primary = SimulatedClock::new();
    let secondary = SimulatedClock::new();

    let handle = Session::start(SessionParams {
        config: SessionConfig::default().with_window(window),
        media_id: MediaId::new(MEDIA),
        manifest_provider: Arc::new(backend.clone()),
        segment_provider: Arc::new(backend.clone()),
        sink: Box::new(sink.clone()),
        primary: Box::new(primary.clone()),
        secondary: Box::new(secondary.clone()),
        bus,
    })
    .await
    .expect("session should start");

    Harness {
        handle,
        backend,
        sink,
        primary,
        secondary,
        events,
    }
}

pub fn is_stream_ended(event: &DubEvent) -> bool {
    matches!(event, DubEvent::StreamEnded { .. })
}

pub fn is_playback_started(event: &DubEvent) -> bool {
    matches!(event, DubEvent::PlaybackStarted { .. })
}

/// Let the session task process what has been sent to it
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
