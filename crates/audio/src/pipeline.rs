//! Upload pipeline
//!
//! Accept PCM -> transcribe -> prefix gate -> intent match -> dispatch
//! -> synthesized confirmation back over the originating session.
//! Every accepted upload persists exactly one transcript row, whatever
//! path it takes. External-collaborator failures degrade to a reason
//! code; a command already dispatched stands regardless of TTS.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::Serialize;

use robohub_core::{PayloadMap, ServerFrame, PCM_FORMAT};
use robohub_fleet::{CommandRouter, SendOutcome, SessionManager};
use robohub_persistence::{AuditStore, NewTranscript};

use crate::engine::{SpeechToText, TextToSpeech};
use crate::gate::{normalize, PrefixGate};
use crate::intent::IntentMatcher;

/// Pipeline tunables, lifted from the audio section of the settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub confidence_threshold: f32,
    pub chunk_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            confidence_threshold: 0.70,
            chunk_bytes: 2048,
        }
    }
}

/// One PCM upload from a device.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub device_id: String,
    pub manual: bool,
    pub level: Option<i64>,
    pub threshold: Option<i64>,
    pub pcm: Vec<u8>,
}

/// Outcome returned to the uploader.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub text: String,
    pub normalized_text: String,
    pub prefix_ok: bool,
    pub command_name: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_status: Option<String>,
}

impl UploadSummary {
    fn unmatched(reason: &'static str) -> Self {
        Self {
            matched: false,
            reason: Some(reason),
            text: String::new(),
            normalized_text: String::new(),
            prefix_ok: false,
            command_name: None,
            confidence: 0.0,
            command_id: None,
            dispatch_status: None,
        }
    }
}

/// The audio ingest pipeline.
pub struct AudioPipeline {
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    matcher: Arc<dyn IntentMatcher>,
    gate: PrefixGate,
    router: Arc<CommandRouter>,
    sessions: Arc<SessionManager>,
    store: AuditStore,
    config: PipelineConfig,
}

impl AudioPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        matcher: Arc<dyn IntentMatcher>,
        gate: PrefixGate,
        router: Arc<CommandRouter>,
        sessions: Arc<SessionManager>,
        store: AuditStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stt,
            tts,
            matcher,
            gate,
            router,
            sessions,
            store,
            config,
        }
    }

    /// Run one upload end to end.
    pub async fn process_upload(&self, request: UploadRequest) -> UploadSummary {
        let text = match self
            .stt
            .transcribe(&request.pcm, self.config.sample_rate)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(device_id = %request.device_id, error = %e, "transcription failed");
                let summary = UploadSummary::unmatched("stt_failed");
                self.persist_transcript(&request, &summary).await;
                return summary;
            }
        };

        let normalized = normalize(&text);
        let prefix_ok = self.gate.check(&normalized);
        if !prefix_ok && !request.manual {
            tracing::debug!(device_id = %request.device_id, %normalized, "wake phrase missing");
            let summary = UploadSummary {
                text,
                normalized_text: normalized,
                ..UploadSummary::unmatched("prefix_missing")
            };
            self.persist_transcript(&request, &summary).await;
            return summary;
        }

        let stripped = self.gate.strip(&normalized);
        let candidate = self.matcher.match_intent(&stripped);

        let Some(m) = candidate.filter(|m| m.confidence >= self.config.confidence_threshold)
        else {
            let confidence = candidate.map(|m| m.confidence).unwrap_or(0.0);
            tracing::debug!(
                device_id = %request.device_id,
                %normalized,
                confidence,
                "no intent above threshold"
            );
            let summary = UploadSummary {
                text,
                normalized_text: normalized,
                prefix_ok,
                confidence,
                ..UploadSummary::unmatched("low_confidence")
            };
            self.persist_transcript(&request, &summary).await;
            return summary;
        };

        let command_name = m.intent.command_name();
        let dispatch = self
            .router
            .dispatch(m.intent.device_type(), command_name, PayloadMap::new(), None)
            .await;

        let summary = match dispatch {
            Ok(record) => UploadSummary {
                matched: true,
                reason: None,
                text,
                normalized_text: normalized,
                prefix_ok,
                command_name: Some(command_name.to_string()),
                confidence: m.confidence,
                command_id: Some(record.command_id.clone()),
                dispatch_status: Some(record.status.to_string()),
            },
            Err(e) => {
                tracing::error!(device_id = %request.device_id, error = %e, "command dispatch failed");
                UploadSummary {
                    text,
                    normalized_text: normalized,
                    prefix_ok,
                    command_name: Some(command_name.to_string()),
                    confidence: m.confidence,
                    ..UploadSummary::unmatched("dispatch_failed")
                }
            }
        };
        self.persist_transcript(&request, &summary).await;

        if summary.matched {
            let confirmation = format!("Executing {}", command_name);
            self.speak_to(&request.device_id, &confirmation).await;
        }

        summary
    }

    /// Synthesize `text` and stream it to the named device.
    /// Backs the notify endpoint; returns whether the reply was fully
    /// enqueued.
    pub async fn notify(&self, device_id: &str, text: &str) -> bool {
        self.speak_to(device_id, text).await
    }

    async fn speak_to(&self, device_id: &str, text: &str) -> bool {
        let pcm = match self.tts.synthesize(text, self.config.sample_rate).await {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!(device_id, error = %e, "synthesis failed, skipping audio reply");
                return false;
            }
        };
        self.send_audio_reply(device_id, &pcm)
    }

    /// Chunk PCM into base64 `audio_chunk` frames, the last one
    /// flagged `is_last`. A vanished session skips the reply without
    /// affecting the dispatched command.
    fn send_audio_reply(&self, device_id: &str, pcm: &[u8]) -> bool {
        if pcm.is_empty() {
            return false;
        }
        let chunk_bytes = self.config.chunk_bytes.max(1);
        let total = pcm.len().div_ceil(chunk_bytes);

        for (index, chunk) in pcm.chunks(chunk_bytes).enumerate() {
            let frame = ServerFrame::AudioChunk {
                audio_base64: BASE64.encode(chunk),
                is_last: index == total - 1,
                samplerate: self.config.sample_rate,
                format: PCM_FORMAT.to_string(),
                index,
                total,
            };
            let outcome = self.sessions.send(device_id, frame);
            if outcome != SendOutcome::Sent {
                tracing::warn!(
                    device_id,
                    chunk = index + 1,
                    total,
                    outcome = ?outcome,
                    "audio reply chunk not delivered"
                );
                return false;
            }
        }
        true
    }

    async fn persist_transcript(&self, request: &UploadRequest, summary: &UploadSummary) {
        let result = self
            .store
            .insert_transcript(NewTranscript {
                device_id: request.device_id.clone(),
                raw_text: summary.text.clone(),
                normalized_text: summary.normalized_text.clone(),
                prefix_ok: summary.prefix_ok,
                command_name: summary.command_name.clone(),
                confidence: summary.confidence,
                manual: request.manual,
                level: request.level,
                threshold: request.threshold,
                timestamp: Utc::now(),
            })
            .await;
        if let Err(e) = result {
            tracing::error!(device_id = %request.device_id, error = %e, "transcript write failed");
        }
    }
}
