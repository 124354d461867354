//! HTTP client for the dubbing backend
//!
//! Implements both provider traits:
//! - `POST {base}/video_split` returns the manifest
//! - `POST {base}/dubbing` returns base64 audio per requested chunk id

use super::provider::{ManifestProvider, ProviderError, SegmentFetch, SegmentProvider};
use super::types::{Manifest, MediaId, SegmentBuffer, SegmentId, SegmentKey};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use dub_common::config::BackendSettings;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ManifestRequest<'a> {
    video_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ManifestResponse {
    chunks: Vec<ChunkKey>,
    #[serde(default = "default_need_translator")]
    need_translator: bool,
}

fn default_need_translator() -> bool {
    true
}

/// Chunk start offset as sent by `video_split`: a JSON number (`0`, `12.48`)
/// or an already formatted string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkKey {
    Offset(serde_json::Number),
    Label(String),
}

impl From<ChunkKey> for SegmentKey {
    fn from(key: ChunkKey) -> Self {
        match key {
            ChunkKey::Offset(offset) => SegmentKey::new(offset.to_string()),
            ChunkKey::Label(label) => SegmentKey::new(label),
        }
    }
}

#[derive(Debug, Serialize)]
struct DubbingRequest<'a> {
    video_id: &'a str,
    list_chunks_id: Vec<&'a str>,
    source_language: &'a str,
    target_language: &'a str,
    translator: &'a str,
    tts_voice: &'a str,
    need_translator: bool,
}

#[derive(Debug, Deserialize)]
struct DubbingResponse {
    chunks: Vec<DubbingChunk>,
}

#[derive(Debug, Deserialize)]
struct DubbingChunk {
    chunk_id: String,
    #[serde(default)]
    audio_base64: Option<String>,
}

/// Dubbing backend client
pub struct HttpBackend {
    client: Client,
    settings: BackendSettings,
}

impl HttpBackend {
    pub fn new(settings: BackendSettings) -> std::result::Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> std::result::Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ManifestProvider for HttpBackend {
    async fn fetch_manifest(&self, media_id: &MediaId) -> std::result::Result<Manifest, ProviderError> {
        let response: ManifestResponse = self
            .post_json(
                "video_split",
                &ManifestRequest {
                    video_id: media_id.as_str(),
                },
            )
            .await?;

        debug!(
            "Manifest for {}: {} segments (need_translator={})",
            media_id,
            response.chunks.len(),
            response.need_translator
        );

        Ok(Manifest::new(
            media_id.clone(),
            response.chunks.into_iter().map(SegmentKey::from).collect(),
            response.need_translator,
        ))
    }
}

#[async_trait]
impl SegmentProvider for HttpBackend {
    async fn fetch_segments(
        &self,
        media_id: &MediaId,
        ids: &[SegmentId],
        needs_translation: bool,
    ) -> std::result::Result<Vec<SegmentFetch>, ProviderError> {
        let request = DubbingRequest {
            video_id: media_id.as_str(),
            list_chunks_id: ids.iter().map(SegmentId::as_str).collect(),
            source_language: &self.settings.source_language,
            target_language: &self.settings.target_language,
            translator: &self.settings.translator,
            tts_voice: &self.settings.tts_voice,
            need_translator: needs_translation,
        };

        let response: DubbingResponse = self.post_json("dubbing", &request).await?;
        Ok(decode_chunks(ids, response.chunks))
    }
}

/// Match response chunks against the requested ids
///
/// Every requested id gets exactly one result. Chunks for ids that were not
/// requested are ignored.
fn decode_chunks(ids: &[SegmentId], chunks: Vec<DubbingChunk>) -> Vec<SegmentFetch> {
    let mut by_id: HashMap<String, Option<String>> = chunks
        .into_iter()
        .map(|c| (c.chunk_id, c.audio_base64))
        .collect();

    ids.iter()
        .map(|id| match by_id.remove(id.as_str()) {
            Some(Some(encoded)) if !encoded.is_empty() => {
                match general_purpose::STANDARD.decode(encoded.as_bytes()) {
                    Ok(bytes) => SegmentFetch::ready(id.clone(), SegmentBuffer::new(bytes)),
                    Err(e) => {
                        warn!("Invalid base64 audio for {}: {}", id, e);
                        SegmentFetch::failed(id.clone(), ProviderError::Malformed(e.to_string()))
                    }
                }
            }
            Some(_) => SegmentFetch::failed(
                id.clone(),
                ProviderError::Failed("empty audio payload".to_string()),
            ),
            None => SegmentFetch::failed(id.clone(), ProviderError::Missing(id.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, audio: Option<&str>) -> DubbingChunk {
        DubbingChunk {
            chunk_id: id.to_string(),
            audio_base64: audio.map(str::to_string),
        }
    }

    #[test]
    fn test_decode_chunks_matches_requested_ids() {
        let ids = vec![
            SegmentId::from_raw("v_0"),
            SegmentId::from_raw("v_10"),
            SegmentId::from_raw("v_20"),
            SegmentId::from_raw("v_30"),
        ];
        // "AQID" = [1, 2, 3]
        let chunks = vec![
            chunk("v_10", Some("AQID")),
            chunk("v_0", Some("!!not base64!!")),
            chunk("v_20", None),
            chunk("v_99", Some("AQID")),
        ];

        let results = decode_chunks(&ids, chunks);
        assert_eq!(results.len(), 4);

        assert!(matches!(results[0].outcome, Err(ProviderError::Malformed(_))));
        assert_eq!(results[1].outcome.as_ref().unwrap().as_slice(), &[1, 2, 3]);
        assert!(matches!(results[2].outcome, Err(ProviderError::Failed(_))));
        assert!(matches!(results[3].outcome, Err(ProviderError::Missing(_))));
    }

    #[test]
    fn test_manifest_response_parsing() {
        let response: ManifestResponse =
            serde_json::from_str(r#"{"chunks": [0, 10, 20], "need_translator": false}"#).unwrap();
        let keys: Vec<SegmentKey> = response.chunks.into_iter().map(SegmentKey::from).collect();
        assert_eq!(
            keys,
            vec![SegmentKey::new("0"), SegmentKey::new("10"), SegmentKey::new("20")]
        );
        assert!(!response.need_translator);

        let response: ManifestResponse = serde_json::from_str(r#"{"chunks": []}"#).unwrap();
        assert!(response.need_translator);
    }

    #[test]
    fn test_manifest_with_fractional_offsets() {
        let response: ManifestResponse =
            serde_json::from_str(r#"{"chunks": [0.0, 12.48, 31.2, "45.00"]}"#).unwrap();
        let manifest = Manifest::new(
            MediaId::new("vid"),
            response.chunks.into_iter().map(SegmentKey::from).collect(),
            response.need_translator,
        );

        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.id_at(0).unwrap().as_str(), "vid_0.0");
        assert_eq!(manifest.id_at(1).unwrap().as_str(), "vid_12.48");
        assert_eq!(manifest.id_at(2).unwrap().as_str(), "vid_31.2");
        assert_eq!(manifest.id_at(3).unwrap().as_str(), "vid_45.00");
    }

    #[test]
    fn test_dubbing_request_shape() {
        let settings = BackendSettings::default();
        let request = DubbingRequest {
            video_id: "vid",
            list_chunks_id: vec!["vid_0", "vid_10"],
            source_language: &settings.source_language,
            target_language: &settings.target_language,
            translator: &settings.translator,
            tts_voice: &settings.tts_voice,
            need_translator: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["video_id"], "vid");
        assert_eq!(json["list_chunks_id"][1], "vid_10");
        assert_eq!(json["target_language"], "vi");
        assert_eq!(json["tts_voice"], "vi-VN-HoaiMyNeural");
        assert_eq!(json["need_translator"], true);
    }

    #[test]
    fn test_url_join() {
        let settings = BackendSettings {
            base_url: "http://host:8000/".to_string(),
            ..BackendSettings::default()
        };
        let backend = HttpBackend::new(settings).unwrap();
        assert_eq!(backend.url("dubbing"), "http://host:8000/dubbing");
    }
}
