//! Reference handlers for the built-in workflow kinds
//!
//! Each handler works against an in-memory [`EntityStore`]. Audio
//! transcription delegates to an injected [`Transcriber`].

mod batch;
mod consent;
pub mod entities;
mod patient;
mod prescription;
mod transcription;

pub use batch::{BatchProcessingHandler, MAX_BATCH_ITEMS};
pub use consent::ConsentHandlingHandler;
pub use entities::EntityStore;
pub use patient::{PatientRegistrationHandler, RecordCreationHandler};
pub use prescription::{PrescriptionProcessingHandler, MAX_REFILLS};
pub use transcription::{
    AudioTranscriptionHandler, Transcriber, TranscriptionError, UnavailableTranscriber,
};

use crate::config::OrchestratorConfig;
use crate::workflow::{
    Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult,
    RequiredFieldsValidator, WorkflowData,
};
use serde_json::Value;
use std::sync::Arc;

/// Register a new patient
pub const PATIENT_REGISTRATION: &str = "patient_registration";
/// Create a medical record
pub const RECORD_CREATION: &str = "record_creation";
/// Process a prescription
pub const PRESCRIPTION_PROCESSING: &str = "prescription_processing";
/// Grant or revoke consent
pub const CONSENT_HANDLING: &str = "consent_handling";
/// Transcribe an audio recording
pub const AUDIO_TRANSCRIPTION: &str = "audio_transcription";
/// Run a list of workflow items
pub const BATCH_PROCESSING: &str = "batch_processing";

/// Registry with every reference handler
///
/// Batch items are validated with the rule table in `config` and may use
/// any kind except `batch_processing` itself.
pub fn default_registry(
    entities: Arc<EntityStore>,
    transcriber: Arc<dyn Transcriber>,
    config: &OrchestratorConfig,
) -> HandlerRegistry {
    let item_handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(PatientRegistrationHandler::new(Arc::clone(&entities))),
        Arc::new(RecordCreationHandler::new(Arc::clone(&entities))),
        Arc::new(PrescriptionProcessingHandler::new(Arc::clone(&entities))),
        Arc::new(ConsentHandlingHandler::new(Arc::clone(&entities))),
        Arc::new(AudioTranscriptionHandler::new(entities, transcriber)),
    ];

    let items = item_handlers
        .iter()
        .cloned()
        .fold(HandlerRegistry::builder(), |builder, handler| {
            builder.register_arc(handler)
        })
        .build();
    let batch = BatchProcessingHandler::new(
        items,
        Arc::new(RequiredFieldsValidator::from_config(config)),
    );

    item_handlers
        .into_iter()
        .fold(HandlerRegistry::builder(), |builder, handler| {
            builder.register_arc(handler)
        })
        .register(batch)
        .build()
}

fn required_str<'a>(data: &'a WorkflowData, field: &str) -> HandlerResult<&'a str> {
    match optional_str(data, field)? {
        Some(value) => Ok(value),
        None => Err(HandlerError::InvalidInput(format!("{} is required", field))),
    }
}

/// Trimmed string field; absent or null is `None`, blank or non-string is an error
fn optional_str<'a>(data: &'a WorkflowData, field: &str) -> HandlerResult<Option<&'a str>> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(Some(value.trim())),
        Some(Value::String(_)) => Err(HandlerError::InvalidInput(format!(
            "{} cannot be blank",
            field
        ))),
        Some(other) => Err(HandlerError::InvalidInput(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

fn optional_value(data: &WorkflowData, field: &str) -> Value {
    data.get(field).cloned().unwrap_or(Value::Null)
}

fn require_patient(entities: &EntityStore, patient_id: &str) -> HandlerResult<Value> {
    entities
        .get(entities::PATIENTS, patient_id)
        .ok_or_else(|| HandlerError::NotFound(format!("patient {}", patient_id)))
}

fn acting_user(ctx: &HandlerContext) -> Value {
    ctx.get("user").cloned().unwrap_or(Value::Null)
}
