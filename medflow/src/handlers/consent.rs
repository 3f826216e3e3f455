//! Consent grants and revocations

use super::entities::{EntityStore, CONSENTS};
use super::CONSENT_HANDLING;
use super::{acting_user, require_patient, required_str};
use crate::workflow::{Handler, HandlerContext, HandlerError, HandlerResult, WorkflowData};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Records the latest consent decision per patient and consent type
///
/// Consent ids are `{patient_id}:{consent_type}`, so a later decision
/// replaces the earlier one.
pub struct ConsentHandlingHandler {
    entities: Arc<EntityStore>,
}

impl ConsentHandlingHandler {
    /// Handler writing into `entities`
    pub fn new(entities: Arc<EntityStore>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl Handler for ConsentHandlingHandler {
    fn workflow_type(&self) -> &str {
        CONSENT_HANDLING
    }

    fn description(&self) -> &str {
        "Grant or revoke a patient consent"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let patient_id = required_str(data, "patient_id")?;
        let consent_type = required_str(data, "consent_type")?;
        let granted = match data.get("granted") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(granted)) => *granted,
            Some(other) => {
                return Err(HandlerError::InvalidInput(format!(
                    "granted must be a boolean, got {}",
                    other
                )))
            }
        };
        require_patient(&self.entities, patient_id)?;

        let consent_id = format!("{}:{}", patient_id, consent_type);
        let previous = self.entities.insert(
            CONSENTS,
            &consent_id,
            json!({
                "id": consent_id,
                "patient_id": patient_id,
                "consent_type": consent_type,
                "granted": granted,
                "recorded_by": acting_user(ctx),
                "recorded_at": Utc::now().to_rfc3339(),
            }),
        );
        tracing::info!(consent_id = %consent_id, granted, "consent recorded");

        Ok(json!({
            "consent_id": consent_id,
            "consent_type": consent_type,
            "granted": granted,
            "previously_granted": previous.and_then(|p| p["granted"].as_bool()),
        }))
    }
}
