//! Session driver
//!
//! Runs a `SessionCore` on its own tokio task. The task owns all session
//! state and consumes `SessionEvent`s from one unbounded channel, one at a
//! time. Provider calls and back-off timers run as spawned tasks holding
//! only a sender clone, so results arriving after shutdown are dropped with
//! the closed channel.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::playback::clock::{ClockEvent, PlaybackClock};
use crate::playback::events::{SessionEmitter, SessionEvent};
use crate::playback::scheduler::FetchBatch;
use crate::playback::session::{SessionAction, SessionCore};
use crate::playback::sink::{MediaSink, SinkEvents};
use crate::segment::{ManifestProvider, MediaId, SegmentProvider};
use dub_common::events::{ClockRole, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// Everything a session needs
pub struct SessionParams {
    pub config: SessionConfig,
    pub media_id: MediaId,
    pub manifest_provider: Arc<dyn ManifestProvider>,
    pub segment_provider: Arc<dyn SegmentProvider>,
    pub sink: Box<dyn MediaSink>,
    pub primary: Box<dyn PlaybackClock>,
    pub secondary: Box<dyn PlaybackClock>,
    pub bus: Arc<EventBus>,
}

/// Session loop state, owned by the session task
pub struct Session {
    id: Uuid,
    core: SessionCore,
    media_id: MediaId,
    needs_translation: bool,
    segment_provider: Arc<dyn SegmentProvider>,
    tick_interval: Duration,
    emitter: SessionEmitter,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Fetch the manifest, open the sink and start the session task
    ///
    /// Fails only if the manifest cannot be obtained.
    pub async fn start(params: SessionParams) -> Result<SessionHandle> {
        let SessionParams {
            config,
            media_id,
            manifest_provider,
            segment_provider,
            sink,
            primary,
            secondary,
            bus,
        } = params;

        let manifest = manifest_provider
            .fetch_manifest(&media_id)
            .await
            .map_err(|source| Error::ManifestUnavailable {
                media_id: media_id.to_string(),
                source,
            })?;

        let id = Uuid::new_v4();
        info!(
            "🎬 Session {} starting: {} ({} segments, window {})",
            id,
            media_id,
            manifest.len(),
            config.window
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = SessionEmitter::new(id, bus);
        let needs_translation = manifest.needs_translation();
        let tick_interval = config.tick_interval;

        let mut core = SessionCore::new(
            config,
            Arc::new(manifest),
            sink,
            primary,
            secondary,
            emitter.clone(),
        );
        core.attach_sink(SinkEvents::new(tx.clone()));
        let initial = core.start();

        let session = Session {
            id,
            core,
            media_id,
            needs_translation,
            segment_provider,
            tick_interval,
            emitter,
            tx: tx.clone(),
            rx,
        };
        session.dispatch(initial);

        let task = tokio::spawn(session.run());

        Ok(SessionHandle {
            id,
            tx,
            task: Some(task),
        })
    }

    async fn run(mut self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
                _ = ticker.tick(), if self.core.wants_tick() => SessionEvent::Tick,
            };

            if matches!(event, SessionEvent::Shutdown) {
                debug!("Session {} shutting down", self.id);
                break;
            }

            let actions = self.core.handle(event);
            self.dispatch(actions);
        }

        self.core.shutdown();
        self.emitter.session_closed();
        info!("Session {} closed", self.id);
    }

    fn dispatch(&self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Fetch(batch) => self.spawn_fetch(batch),
                SessionAction::ScheduleFetchRetry(batch, delay) => {
                    self.spawn_timer(delay, SessionEvent::FetchRetryDue(batch))
                }
                SessionAction::ScheduleAppendRetry(delay) => {
                    self.spawn_timer(delay, SessionEvent::AppendRetryDue)
                }
            }
        }
    }

    fn spawn_fetch(&self, batch: FetchBatch) {
        let provider = Arc::clone(&self.segment_provider);
        let media_id = self.media_id.clone();
        let needs_translation = self.needs_translation;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = provider
                .fetch_segments(&media_id, &batch.ids, needs_translation)
                .await;
            if tx
                .send(SessionEvent::FetchResolved { batch, result })
                .is_err()
            {
                debug!("Fetch result dropped: session closed");
            }
        });
    }

    fn spawn_timer(&self, delay: Duration, event: SessionEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }
}

/// Control handle for a running session
///
/// Hosts report clock events through it. Dropping the handle stops the
/// session.
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Report an event on the primary (video) clock
    pub fn primary_event(&self, event: ClockEvent) {
        self.send(SessionEvent::Clock {
            role: ClockRole::Primary,
            event,
        });
    }

    /// Report an event on the secondary (dub) clock
    pub fn secondary_event(&self, event: ClockEvent) {
        self.send(SessionEvent::Clock {
            role: ClockRole::Secondary,
            event,
        });
    }

    /// Ask the session task to stop
    pub fn shutdown(&self) {
        self.send(SessionEvent::Shutdown);
    }

    /// Whether the session task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the session task to exit (call `shutdown()` first)
    pub async fn join(mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))?;
        }
        Ok(())
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Session {} already closed", self.id);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionEvent::Shutdown);
    }
}
