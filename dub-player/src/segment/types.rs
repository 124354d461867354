//! Segment identifiers, manifest and byte buffers

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque identifier of the source media (e.g. a video id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(String);

impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a segment within its media, typically its start offset
///
/// Kept exactly as the backend spells it (`0`, `12.48`) and only used to
/// derive the segment id. Play order is manifest order, never key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentKey(String);

impl SegmentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one segment, unique within a media item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    /// Derive the id of the segment at `key` of `media`
    ///
    /// The format (`{media}_{key}`) is what the dubbing backend uses as chunk id.
    pub fn derive(media: &MediaId, key: &SegmentKey) -> Self {
        Self(format!("{}_{}", media.as_str(), key.as_str()))
    }

    /// Wrap an id received from a provider response
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered segment list for one media item
///
/// Loaded once per session and never modified afterwards. Duplicate keys are
/// dropped (first occurrence wins) so every id maps to exactly one position.
#[derive(Debug, Clone)]
pub struct Manifest {
    media_id: MediaId,
    ids: Vec<SegmentId>,
    members: HashSet<SegmentId>,
    needs_translation: bool,
}

impl Manifest {
    pub fn new(media_id: MediaId, keys: Vec<SegmentKey>, needs_translation: bool) -> Self {
        let mut seen = HashSet::with_capacity(keys.len());
        let ids: Vec<SegmentId> = keys
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .map(|k| SegmentId::derive(&media_id, &k))
            .collect();
        let members = ids.iter().cloned().collect();

        Self {
            media_id,
            ids,
            members,
            needs_translation,
        }
    }

    pub fn media_id(&self) -> &MediaId {
        &self.media_id
    }

    /// Forwarded unchanged on every segment request
    pub fn needs_translation(&self) -> bool {
        self.needs_translation
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_at(&self, index: usize) -> Option<&SegmentId> {
        self.ids.get(index)
    }

    pub fn contains(&self, id: &SegmentId) -> bool {
        self.members.contains(id)
    }
}

/// Raw encoded audio for one segment
///
/// Moved, never cloned, on its way from provider to cache to sink.
#[derive(Debug, PartialEq, Eq)]
pub struct SegmentBuffer {
    data: Vec<u8>,
}

impl SegmentBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
