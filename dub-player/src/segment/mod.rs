//! Segment data model, cache and providers

pub mod cache;
pub mod http;
pub mod provider;
pub mod types;

pub use cache::SegmentCache;
pub use http::HttpBackend;
pub use provider::{ManifestProvider, ProviderError, SegmentFetch, SegmentProvider};
pub use types::{Manifest, MediaId, SegmentBuffer, SegmentId, SegmentKey};
