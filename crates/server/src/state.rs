//! Application state
//!
//! The composition root in data form: every handler reaches the fleet
//! components through this shared state. Constructed once at startup;
//! no lazy singletons.

use std::sync::Arc;
use std::time::Duration;

use robohub_audio::{
    AudioPipeline, HttpSttEngine, HttpTtsEngine, KeywordMatcher, PipelineConfig, PrefixGate,
    SpeechToText, TextToSpeech, UnavailableStt, UnavailableTts,
};
use robohub_config::Settings;
use robohub_fleet::{CommandRouter, DeviceRegistry, SessionManager, SnapshotIngestor};
use robohub_persistence::AuditStore;

use crate::logs::LogBuffer;

/// Shared state across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: AuditStore,
    pub registry: Arc<DeviceRegistry>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<CommandRouter>,
    pub ingestor: Arc<SnapshotIngestor>,
    pub pipeline: Arc<AudioPipeline>,
    pub logs: LogBuffer,
}

impl AppState {
    /// Wire the fleet components against one audit store.
    pub fn new(config: Settings, store: AuditStore, logs: LogBuffer) -> Self {
        let registry = Arc::new(DeviceRegistry::new(store.clone()));
        let sessions = Arc::new(SessionManager::new(config.fleet.outbound_queue_capacity));
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&sessions),
            store.clone(),
            Duration::from_secs(config.fleet.command_ack_timeout_seconds),
        ));
        let ingestor = Arc::new(SnapshotIngestor::new(store.clone()));

        let stt: Arc<dyn SpeechToText> = match &config.audio.stt_url {
            Some(url) => Arc::new(HttpSttEngine::new(url.clone())),
            None => Arc::new(UnavailableStt),
        };
        let tts: Arc<dyn TextToSpeech> = match &config.audio.tts_url {
            Some(url) => Arc::new(HttpTtsEngine::new(url.clone())),
            None => Arc::new(UnavailableTts),
        };

        let pipeline = Arc::new(AudioPipeline::new(
            stt,
            tts,
            Arc::new(KeywordMatcher::new()),
            PrefixGate::new(&config.audio.prefix_phrases),
            Arc::clone(&router),
            Arc::clone(&sessions),
            store.clone(),
            PipelineConfig {
                sample_rate: config.audio.sample_rate,
                confidence_threshold: config.audio.confidence_threshold,
                chunk_bytes: config.audio.chunk_bytes,
            },
        ));

        Self {
            config: Arc::new(config),
            store,
            registry,
            sessions,
            router,
            ingestor,
            pipeline,
            logs,
        }
    }
}
