//! Audio ingest pipeline for robohub
//!
//! Takes a raw PCM upload from a device through transcription, the
//! wake-phrase prefix gate and fuzzy command matching, dispatches the
//! resulting command through the router, and answers the originating
//! device with a synthesized confirmation over its session channel.
//!
//! The speech engines are external collaborators behind small async
//! traits; the server only assumes `pcm -> text` and `text -> pcm`.

pub mod engine;
pub mod gate;
pub mod intent;
pub mod pipeline;

pub use engine::{HttpSttEngine, HttpTtsEngine, SpeechToText, TextToSpeech, UnavailableStt, UnavailableTts};
pub use gate::{normalize, PrefixGate};
pub use intent::{Intent, IntentMatch, IntentMatcher, KeywordMatcher};
pub use pipeline::{AudioPipeline, PipelineConfig, UploadRequest, UploadSummary};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("engine not configured")]
    EngineUnavailable,

    #[error("engine request failed: {0}")]
    Engine(String),

    #[error("engine returned malformed response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for AudioError {
    fn from(e: reqwest::Error) -> Self {
        AudioError::Engine(e.to_string())
    }
}
