//! Session core - event handling for one dub session
//!
//! **Responsibilities:**
//! - Route each `SessionEvent` to the scheduler, feeder or synchronizer
//! - Run the pump after every event: fill pass, fetch dispatch, submission,
//!   end-of-stream check
//! - Publish session milestones on the event bus
//!
//! The core performs no I/O of its own. Provider calls and timers are
//! returned as `SessionAction`s for the driver to run; their results come
//! back as further `SessionEvent`s.

use crate::config::SessionConfig;
use crate::playback::clock::PlaybackClock;
use crate::playback::events::{SessionEmitter, SessionEvent};
use crate::playback::feeder::{BufferFeeder, FeederState, SubmitOutcome};
use crate::playback::scheduler::{FetchBatch, PrefetchScheduler};
use crate::playback::sink::{BufferedRange, MediaSink, SinkEvent, SinkEvents};
use crate::playback::sync::ClockSync;
use crate::segment::Manifest;
use dub_common::events::UserNotice;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Work the driver performs on behalf of the core
#[derive(Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Issue one provider call
    Fetch(FetchBatch),
    /// Deliver `FetchRetryDue(batch)` after the delay
    ScheduleFetchRetry(FetchBatch, Duration),
    /// Deliver `AppendRetryDue` after the delay
    ScheduleAppendRetry(Duration),
}

pub struct SessionCore {
    config: SessionConfig,
    scheduler: PrefetchScheduler,
    feeder: BufferFeeder,
    sync: ClockSync,
    emitter: SessionEmitter,
    stream_ended: bool,
    stream_aborted: bool,
}

impl SessionCore {
    pub fn new(
        config: SessionConfig,
        manifest: Arc<Manifest>,
        sink: Box<dyn MediaSink>,
        primary: Box<dyn PlaybackClock>,
        secondary: Box<dyn PlaybackClock>,
        emitter: SessionEmitter,
    ) -> Self {
        Self {
            scheduler: PrefetchScheduler::new(manifest, &config),
            feeder: BufferFeeder::new(sink),
            sync: ClockSync::new(primary, secondary, emitter.clone()),
            emitter,
            config,
            stream_ended: false,
            stream_aborted: false,
        }
    }

    pub fn attach_sink(&mut self, events: SinkEvents) {
        self.feeder.attach(events);
    }

    /// Initial fill pass
    pub fn start(&mut self) -> Vec<SessionAction> {
        let manifest = self.scheduler.manifest();
        self.emitter
            .session_started(manifest.media_id().as_str(), manifest.len());

        let mut actions = Vec::new();
        self.pump(&mut actions);
        actions
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        match event {
            SessionEvent::FetchResolved { batch, result } => {
                let attempt = batch.attempt;
                let outcome = self.scheduler.on_fetch_resolved(batch, result);

                if !outcome.cached.is_empty() {
                    let cache = self.scheduler.cache();
                    debug!(
                        "Cached {} segment(s); cache holds {} ({} bytes)",
                        outcome.cached.len(),
                        cache.len(),
                        cache.bytes()
                    );
                }
                if let Some(retry) = outcome.retry {
                    actions.push(SessionAction::ScheduleFetchRetry(
                        retry,
                        self.config.fetch_retry_delay,
                    ));
                }
                if !outcome.skipped.is_empty() {
                    for (id, reason) in &outcome.skipped {
                        self.emitter
                            .segment_skipped(id.as_str(), attempt, &reason.to_string());
                    }
                    self.emitter.notice(UserNotice::SegmentsSkipped {
                        segment_ids: outcome
                            .skipped
                            .iter()
                            .map(|(id, _)| id.to_string())
                            .collect(),
                    });
                }
            }

            SessionEvent::FetchRetryDue(batch) => {
                if let Some(batch) = self.scheduler.on_retry_due(batch) {
                    self.emitter.segments_requested(&batch);
                    actions.push(SessionAction::Fetch(batch));
                }
            }

            SessionEvent::Sink(SinkEvent::Open) => {
                self.feeder.on_open();
            }

            SessionEvent::Sink(SinkEvent::UpdateEnd) => {
                if let Some(entry) = self.feeder.on_update_end() {
                    self.scheduler.mark_appended(&entry.id);
                    debug!("Appended {} (index {})", entry.id, entry.index);
                    self.emitter
                        .segment_appended(entry.id.as_str(), entry.index, entry.buffer.len());

                    if !self.sync.is_started() {
                        self.sync.on_buffer_ready();
                    }
                }
            }

            SessionEvent::Sink(SinkEvent::Error(reason)) => {
                if let Some(id) = self.feeder.on_append_error(&reason) {
                    self.scheduler.mark_requeued(&id);
                    self.emitter.append_retry(id.as_str(), &reason);
                    actions.push(SessionAction::ScheduleAppendRetry(
                        self.config.append_retry_delay,
                    ));
                }
            }

            SessionEvent::AppendRetryDue => {
                self.feeder.on_retry_due();
            }

            // Look-ahead runs in the pump below
            SessionEvent::Tick | SessionEvent::Shutdown => {}

            SessionEvent::Clock { role, event } => {
                self.sync.handle_clock_event(role, event);
            }
        }

        self.pump(&mut actions);
        actions
    }

    /// Periodic look-ahead still has work to do
    pub fn wants_tick(&self) -> bool {
        !self.stream_ended && !self.feeder.is_terminal()
    }

    pub fn is_stream_ended(&self) -> bool {
        self.stream_ended
    }

    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    pub fn feeder(&self) -> &BufferFeeder {
        &self.feeder
    }

    pub fn sync(&self) -> &ClockSync {
        &self.sync
    }

    /// Release cached bytes
    pub fn shutdown(&mut self) {
        self.scheduler.clear();
    }

    fn pump(&mut self, actions: &mut Vec<SessionAction>) {
        if self.feeder.state() == FeederState::Errored {
            self.report_abort();
            return;
        }

        let fill = self.scheduler.fill_append_queue();
        for entry in fill.entries {
            self.feeder.enqueue(entry);
        }
        if let Some(batch) = fill.fetch {
            self.emitter.segments_requested(&batch);
            actions.push(SessionAction::Fetch(batch));
        }

        match self.feeder.try_submit() {
            SubmitOutcome::Submitted(id) => {
                self.scheduler.mark_appending(&id);
            }
            SubmitOutcome::Rejected { id, reason } => {
                self.emitter.append_retry(id.as_str(), &reason);
                actions.push(SessionAction::ScheduleAppendRetry(
                    self.config.append_retry_delay,
                ));
            }
            SubmitOutcome::Terminal { reason } => {
                error!("Dub stream aborted: {}", reason);
                self.report_abort();
            }
            SubmitOutcome::Nothing => {}
        }

        self.check_end_of_stream();
    }

    fn report_abort(&mut self) {
        if self.stream_aborted {
            return;
        }
        self.stream_aborted = true;
        let reason = self.feeder.failure().unwrap_or("sink errored").to_string();
        self.emitter.stream_aborted(&reason);
    }

    fn check_end_of_stream(&mut self) {
        if self.stream_ended
            || !self.scheduler.is_exhausted()
            || !self.feeder.is_drained()
            || self.feeder.state() != FeederState::Idle
        {
            return;
        }

        if self.feeder.finish().is_err() {
            self.report_abort();
            return;
        }

        self.stream_ended = true;
        self.sync.on_stream_complete();

        let appended = self.scheduler.appended_count();
        let skipped = self.scheduler.failed_count();
        let ranges = self.feeder.sink().buffered();
        debug!("Sink buffered ranges: {:?}", ranges);
        let buffered_bytes = ranges.iter().map(BufferedRange::byte_len).sum();
        info!(
            "🏁 Dub stream complete: {} appended, {} skipped, {} bytes buffered",
            appended, skipped, buffered_bytes
        );
        self.emitter.stream_ended(appended, skipped, buffered_bytes);
    }
}
