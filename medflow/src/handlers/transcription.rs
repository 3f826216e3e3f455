//! Audio transcription through an injected speech-to-text service

use super::entities::{EntityStore, TRANSCRIPTS};
use super::AUDIO_TRANSCRIPTION;
use super::{acting_user, optional_str, require_patient, required_str};
use crate::workflow::{Handler, HandlerContext, HandlerError, HandlerResult, WorkflowData};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a [`Transcriber`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionError {
    /// The service could not be reached or is overloaded
    #[error("transcription service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the audio
    #[error("audio rejected: {0}")]
    Rejected(String),
}

impl From<TranscriptionError> for HandlerError {
    fn from(error: TranscriptionError) -> Self {
        match error {
            TranscriptionError::Unavailable(_) => HandlerError::Dependency(error.to_string()),
            TranscriptionError::Rejected(_) => HandlerError::InvalidInput(error.to_string()),
        }
    }
}

/// Speech-to-text backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio behind `audio_ref`
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: Option<&str>,
    ) -> Result<String, TranscriptionError>;
}

/// Transcriber used when no service is configured; always unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTranscriber;

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(
        &self,
        _audio_ref: &str,
        _language: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::Unavailable(
            "no transcription service configured".to_string(),
        ))
    }
}

/// Transcribes audio and stores the transcript
///
/// Stops waiting on the transcriber as soon as the workflow is cancelled.
pub struct AudioTranscriptionHandler {
    entities: Arc<EntityStore>,
    transcriber: Arc<dyn Transcriber>,
}

impl AudioTranscriptionHandler {
    /// Handler using `transcriber` and writing into `entities`
    pub fn new(entities: Arc<EntityStore>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            entities,
            transcriber,
        }
    }
}

#[async_trait]
impl Handler for AudioTranscriptionHandler {
    fn workflow_type(&self) -> &str {
        AUDIO_TRANSCRIPTION
    }

    fn description(&self) -> &str {
        "Transcribe an audio recording"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let audio_ref = required_str(data, "audio_ref")?;
        let language = optional_str(data, "language")?;
        let patient_id = optional_str(data, "patient_id")?;
        if let Some(patient_id) = patient_id {
            require_patient(&self.entities, patient_id)?;
        }

        let text = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(HandlerError::Cancelled),
            result = self.transcriber.transcribe(audio_ref, language) => result?,
        };

        let transcript_id = self.entities.next_id("trn");
        self.entities.insert(
            TRANSCRIPTS,
            &transcript_id,
            json!({
                "id": transcript_id,
                "audio_ref": audio_ref,
                "patient_id": patient_id,
                "language": language,
                "text": text,
                "requested_by": acting_user(ctx),
                "transcribed_at": Utc::now().to_rfc3339(),
            }),
        );
        tracing::info!(transcript_id = %transcript_id, attempt = ctx.attempt(), "audio transcribed");

        Ok(json!({
            "transcript_id": transcript_id,
            "text": text,
            "characters": text.chars().count(),
        }))
    }
}
