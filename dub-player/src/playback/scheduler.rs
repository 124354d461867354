//! Prefetch Scheduler
//!
//! Decides which segments to request, moves fetched segments into the append
//! queue in strict manifest order, and turns fetch failures into bounded
//! retries followed by a permanent skip.
//!
//! The scheduler does no I/O. It returns `FetchBatch`es for the session to
//! dispatch and consumes their results through `on_fetch_resolved()`.
//!
//! Window accounting: segments that are Requested, Cached, Queued or
//! Appending count against `window`. The segment at `current_index` is always
//! requested when nothing has been asked for it yet, even with a full window,
//! so a pass can never stall on a gap it does not fetch.

use crate::config::SessionConfig;
use crate::playback::feeder::AppendQueueEntry;
use crate::playback::state::{SegmentLedger, SegmentStatus};
use crate::segment::{Manifest, ProviderError, SegmentCache, SegmentFetch, SegmentId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One batched provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    pub ids: Vec<SegmentId>,
    /// 1-based attempt number
    pub attempt: u32,
}

impl FetchBatch {
    pub fn first(ids: Vec<SegmentId>) -> Self {
        Self { ids, attempt: 1 }
    }
}

/// Result of a fill pass
#[derive(Debug, Default)]
pub struct FillOutcome {
    /// Entries to push onto the append queue, in order
    pub entries: Vec<AppendQueueEntry>,
    /// Segments to request
    pub fetch: Option<FetchBatch>,
}

/// Result of handling a provider response
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    /// Ids whose bytes went into the cache
    pub cached: Vec<SegmentId>,
    /// Failed ids to request again after the back-off
    pub retry: Option<FetchBatch>,
    /// Ids that exhausted their attempts
    pub skipped: Vec<(SegmentId, ProviderError)>,
}

pub struct PrefetchScheduler {
    manifest: Arc<Manifest>,
    window: usize,
    fetch_attempts: u32,
    /// Next manifest position not yet queued or skipped
    current_index: usize,
    ledger: SegmentLedger,
    cache: SegmentCache,
}

impl PrefetchScheduler {
    pub fn new(manifest: Arc<Manifest>, config: &SessionConfig) -> Self {
        Self {
            manifest,
            window: config.window.max(1),
            fetch_attempts: config.fetch_attempts.max(1),
            current_index: 0,
            ledger: SegmentLedger::new(),
            cache: SegmentCache::new(),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn status(&self, id: &SegmentId) -> SegmentStatus {
        self.ledger.status(id)
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// Every manifest position has been queued or skipped
    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.manifest.len()
    }

    /// Claim `ids` for fetching
    ///
    /// Ids that are already requested, cached, queued, appended or failed (or
    /// not in the manifest) are dropped; the rest become Requested and form
    /// one batch.
    pub fn fetch_segments(&mut self, ids: impl IntoIterator<Item = SegmentId>) -> Option<FetchBatch> {
        let mut claimed = Vec::new();
        for id in ids {
            if !self.manifest.contains(&id) {
                warn!("Not requesting {}: not in manifest", id);
                continue;
            }
            if self.ledger.transition(&id, SegmentStatus::Requested) {
                claimed.push(id);
            }
        }

        if claimed.is_empty() {
            None
        } else {
            debug!("Requesting {} segment(s): {:?}", claimed.len(), claimed);
            Some(FetchBatch::first(claimed))
        }
    }

    /// Move cached segments into the append queue and request what is missing
    ///
    /// Advances `current_index` over appended and failed segments, queues
    /// cached ones, and stops at the first segment whose bytes are not here
    /// yet. Then claims not-started segments ahead of `current_index` while
    /// the window has room. Everything claimed in one pass goes out as one
    /// batch.
    pub fn fill_append_queue(&mut self) -> FillOutcome {
        let mut entries = Vec::new();
        let mut wanted = Vec::new();

        while self.ledger.count(SegmentStatus::Queued) < self.window {
            let Some(id) = self.manifest.id_at(self.current_index).cloned() else {
                break;
            };

            match self.ledger.status(&id) {
                status if status.is_terminal() => {
                    self.current_index += 1;
                }
                SegmentStatus::Cached => {
                    let Some(buffer) = self.cache.take(&id) else {
                        error!("Segment {} marked cached but has no bytes", id);
                        break;
                    };
                    self.ledger.transition(&id, SegmentStatus::Queued);
                    debug!("Queued {} (index {})", id, self.current_index);
                    entries.push(AppendQueueEntry::new(id, self.current_index, buffer));
                    self.current_index += 1;
                }
                SegmentStatus::Requested => break,
                SegmentStatus::NotStarted => {
                    wanted.push(id);
                    break;
                }
                _ => {
                    // Queued or Appending: only reachable if the index was rewound
                    self.current_index += 1;
                }
            }
        }

        // `wanted` holds at most the segment at current_index
        let scan_from = self.current_index + wanted.len();
        let extra = self.lookahead_candidates(scan_from, wanted.len());
        wanted.extend(extra);

        FillOutcome {
            entries,
            fetch: self.fetch_segments(wanted),
        }
    }

    fn lookahead_candidates(&self, from: usize, pending: usize) -> Vec<SegmentId> {
        let budget = self
            .window
            .saturating_sub(self.ledger.outstanding() + pending);
        if budget == 0 {
            return Vec::new();
        }

        let end = (self.current_index + self.window).min(self.manifest.len());
        (from..end)
            .filter_map(|i| self.manifest.id_at(i))
            .filter(|id| self.ledger.status(id) == SegmentStatus::NotStarted)
            .take(budget)
            .cloned()
            .collect()
    }

    /// Apply a provider response
    ///
    /// State may have moved on since the batch was issued, so only ids that
    /// are still Requested are acted on.
    pub fn on_fetch_resolved(
        &mut self,
        batch: FetchBatch,
        result: std::result::Result<Vec<SegmentFetch>, ProviderError>,
    ) -> ResolveOutcome {
        let mut outcome = ResolveOutcome::default();
        let mut failures: Vec<(SegmentId, ProviderError)> = Vec::new();

        match result {
            Ok(fetches) => {
                let mut answered = HashSet::new();
                for fetch in fetches {
                    if !batch.ids.contains(&fetch.id) {
                        debug!("Ignoring unrequested segment {} in response", fetch.id);
                        continue;
                    }
                    if !answered.insert(fetch.id.clone()) {
                        continue;
                    }
                    match fetch.outcome {
                        Ok(buffer) => {
                            if self.ledger.status(&fetch.id) != SegmentStatus::Requested {
                                debug!(
                                    "Discarding bytes for {}: status is {}",
                                    fetch.id,
                                    self.ledger.status(&fetch.id)
                                );
                                continue;
                            }
                            self.cache.put(fetch.id.clone(), buffer);
                            self.ledger.transition(&fetch.id, SegmentStatus::Cached);
                            outcome.cached.push(fetch.id);
                        }
                        Err(e) => failures.push((fetch.id, e)),
                    }
                }
                for id in &batch.ids {
                    if !answered.contains(id) {
                        failures.push((id.clone(), ProviderError::Missing(id.to_string())));
                    }
                }
            }
            Err(e) => {
                failures.extend(batch.ids.iter().map(|id| (id.clone(), e.clone())));
            }
        }

        failures.retain(|(id, _)| self.ledger.status(id) == SegmentStatus::Requested);
        if failures.is_empty() {
            return outcome;
        }

        if batch.attempt < self.fetch_attempts {
            warn!(
                "Fetch attempt {}/{} failed for {} segment(s): {}",
                batch.attempt,
                self.fetch_attempts,
                failures.len(),
                failures[0].1
            );
            outcome.retry = Some(FetchBatch {
                ids: failures.into_iter().map(|(id, _)| id).collect(),
                attempt: batch.attempt + 1,
            });
        } else {
            for (id, error) in failures {
                warn!(
                    "Skipping segment {} after {} failed attempts: {}",
                    id, batch.attempt, error
                );
                self.ledger.transition(&id, SegmentStatus::Failed);
                outcome.skipped.push((id, error));
            }
        }

        outcome
    }

    /// Back-off elapsed: re-issue the ids that are still waiting
    pub fn on_retry_due(&mut self, mut batch: FetchBatch) -> Option<FetchBatch> {
        batch
            .ids
            .retain(|id| self.ledger.status(id) == SegmentStatus::Requested);
        if batch.ids.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    pub fn mark_appending(&mut self, id: &SegmentId) -> bool {
        self.ledger.transition(id, SegmentStatus::Appending)
    }

    /// Failed append went back to the head of the queue
    pub fn mark_requeued(&mut self, id: &SegmentId) -> bool {
        self.ledger.transition(id, SegmentStatus::Queued)
    }

    pub fn mark_appended(&mut self, id: &SegmentId) -> bool {
        self.ledger.transition(id, SegmentStatus::Appended)
    }

    pub fn appended_count(&self) -> usize {
        self.ledger.count(SegmentStatus::Appended)
    }

    pub fn failed_count(&self) -> usize {
        self.ledger.count(SegmentStatus::Failed)
    }

    /// Drop cached bytes (session teardown)
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
