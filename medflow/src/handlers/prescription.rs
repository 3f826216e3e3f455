//! Prescription processing

use super::entities::{EntityStore, PRESCRIPTIONS};
use super::PRESCRIPTION_PROCESSING;
use super::{acting_user, optional_str, require_patient, required_str};
use crate::workflow::{Handler, HandlerContext, HandlerError, HandlerResult, WorkflowData};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Upper bound on refills for a single prescription
pub const MAX_REFILLS: u64 = 12;

/// Stores a prescription in `pending` state for pharmacist review
pub struct PrescriptionProcessingHandler {
    entities: Arc<EntityStore>,
}

impl PrescriptionProcessingHandler {
    /// Handler writing into `entities`
    pub fn new(entities: Arc<EntityStore>) -> Self {
        Self { entities }
    }
}

fn parse_refills(data: &WorkflowData) -> HandlerResult<u64> {
    match data.get("refills") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => match value.as_u64() {
            Some(refills) if refills <= MAX_REFILLS => Ok(refills),
            Some(refills) => Err(HandlerError::InvalidInput(format!(
                "refills must be at most {}, got {}",
                MAX_REFILLS, refills
            ))),
            None => Err(HandlerError::InvalidInput(format!(
                "refills must be a non-negative integer, got {}",
                value
            ))),
        },
    }
}

#[async_trait]
impl Handler for PrescriptionProcessingHandler {
    fn workflow_type(&self) -> &str {
        PRESCRIPTION_PROCESSING
    }

    fn description(&self) -> &str {
        "Record a prescription for pharmacist review"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let patient_id = required_str(data, "patient_id")?;
        let medication = required_str(data, "medication")?;
        let dosage = required_str(data, "dosage")?;
        if !dosage.chars().any(|c| c.is_ascii_digit()) {
            return Err(HandlerError::InvalidInput(format!(
                "dosage '{}' does not state an amount",
                dosage
            )));
        }
        let frequency = optional_str(data, "frequency")?;
        let refills = parse_refills(data)?;
        require_patient(&self.entities, patient_id)?;

        let prescription_id = self.entities.next_id("rx");
        self.entities.insert(
            PRESCRIPTIONS,
            &prescription_id,
            json!({
                "id": prescription_id,
                "patient_id": patient_id,
                "medication": medication,
                "dosage": dosage,
                "frequency": frequency,
                "refills": refills,
                "status": "pending",
                "prescribed_by": acting_user(ctx),
                "prescribed_at": Utc::now().to_rfc3339(),
            }),
        );
        tracing::info!(prescription_id = %prescription_id, patient_id, "prescription recorded");

        Ok(json!({ "prescription_id": prescription_id, "status": "pending" }))
    }
}
