//! Speech engine seams
//!
//! The server treats speech-to-text and text-to-speech as pure effects
//! behind small async traits. The bundled implementations talk to HTTP
//! sidecar services; deployments without a sidecar configured get the
//! unavailable variants, which fail soft at the pipeline layer.

use async_trait::async_trait;
use serde::Deserialize;

use crate::AudioError;

/// `pcm -> text` collaborator.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<String, AudioError>;
}

/// `text -> pcm` collaborator.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, sample_rate: u32) -> Result<Vec<u8>, AudioError>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// STT client posting raw PCM to a sidecar transcription service.
pub struct HttpSttEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpSttEngine {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSttEngine {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<String, AudioError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("samplerate", sample_rate)])
            .header("content-type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await?
            .error_for_status()?;

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| AudioError::MalformedResponse(e.to_string()))?;
        Ok(body.text)
    }
}

/// TTS client fetching synthesized PCM from a sidecar service.
pub struct HttpTtsEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpTtsEngine {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTtsEngine {
    async fn synthesize(&self, text: &str, sample_rate: u32) -> Result<Vec<u8>, AudioError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": text,
                "samplerate": sample_rate,
            }))
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Placeholder when no STT sidecar is configured.
pub struct UnavailableStt;

#[async_trait]
impl SpeechToText for UnavailableStt {
    async fn transcribe(&self, _pcm: &[u8], _sample_rate: u32) -> Result<String, AudioError> {
        Err(AudioError::EngineUnavailable)
    }
}

/// Placeholder when no TTS sidecar is configured.
pub struct UnavailableTts;

#[async_trait]
impl TextToSpeech for UnavailableTts {
    async fn synthesize(&self, _text: &str, _sample_rate: u32) -> Result<Vec<u8>, AudioError> {
        Err(AudioError::EngineUnavailable)
    }
}
