//! Patient registration and medical record creation

use super::entities::{EntityStore, PATIENTS, RECORDS};
use super::{acting_user, optional_value, require_patient, required_str};
use super::{PATIENT_REGISTRATION, RECORD_CREATION};
use crate::workflow::{Handler, HandlerContext, HandlerError, HandlerResult, WorkflowData};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Creates a patient from name and date of birth
///
/// Fails with `Conflict` when a patient with the same name (case
/// insensitive) and date of birth already exists.
pub struct PatientRegistrationHandler {
    entities: Arc<EntityStore>,
    // serializes the duplicate check with the insert
    registration: Mutex<()>,
}

impl PatientRegistrationHandler {
    /// Handler writing into `entities`
    pub fn new(entities: Arc<EntityStore>) -> Self {
        Self {
            entities,
            registration: Mutex::new(()),
        }
    }
}

fn parse_date_of_birth(raw: &str) -> HandlerResult<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        HandlerError::InvalidInput(format!("date_of_birth '{}' is not a YYYY-MM-DD date", raw))
    })?;
    if date > Utc::now().date_naive() {
        return Err(HandlerError::InvalidInput(format!(
            "date_of_birth '{}' is in the future",
            raw
        )));
    }
    Ok(date)
}

fn same_name(document: &Value, field: &str, expected: &str) -> bool {
    document[field]
        .as_str()
        .is_some_and(|name| name.eq_ignore_ascii_case(expected))
}

#[async_trait]
impl Handler for PatientRegistrationHandler {
    fn workflow_type(&self) -> &str {
        PATIENT_REGISTRATION
    }

    fn description(&self) -> &str {
        "Register a new patient"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let first_name = required_str(data, "first_name")?;
        let last_name = required_str(data, "last_name")?;
        let date_of_birth = parse_date_of_birth(required_str(data, "date_of_birth")?)?.to_string();

        let _guard = self
            .registration
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = self.entities.find(PATIENTS, |patient| {
            same_name(patient, "first_name", first_name)
                && same_name(patient, "last_name", last_name)
                && patient["date_of_birth"] == date_of_birth.as_str()
        }) {
            return Err(HandlerError::Conflict(format!(
                "patient already registered as {}",
                existing["id"].as_str().unwrap_or("unknown")
            )));
        }

        let patient_id = self.entities.next_id("pat");
        self.entities.insert(
            PATIENTS,
            &patient_id,
            json!({
                "id": patient_id,
                "first_name": first_name,
                "last_name": last_name,
                "date_of_birth": date_of_birth,
                "email": optional_value(data, "email"),
                "phone": optional_value(data, "phone"),
                "registered_by": acting_user(ctx),
                "registered_at": Utc::now().to_rfc3339(),
            }),
        );
        tracing::info!(patient_id = %patient_id, "patient registered");

        Ok(json!({ "patient_id": patient_id }))
    }
}

/// Attaches a medical record to an existing patient
pub struct RecordCreationHandler {
    entities: Arc<EntityStore>,
}

impl RecordCreationHandler {
    /// Handler writing into `entities`
    pub fn new(entities: Arc<EntityStore>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl Handler for RecordCreationHandler {
    fn workflow_type(&self) -> &str {
        RECORD_CREATION
    }

    fn description(&self) -> &str {
        "Create a medical record for a patient"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let patient_id = required_str(data, "patient_id")?;
        let record_type = required_str(data, "record_type")?;
        require_patient(&self.entities, patient_id)?;

        let record_id = self.entities.next_id("rec");
        self.entities.insert(
            RECORDS,
            &record_id,
            json!({
                "id": record_id,
                "patient_id": patient_id,
                "record_type": record_type,
                "content": optional_value(data, "content"),
                "created_by": acting_user(ctx),
                "created_at": Utc::now().to_rfc3339(),
                "workflow_id": ctx.workflow_id().to_string(),
            }),
        );
        tracing::info!(record_id = %record_id, patient_id, "medical record created");

        Ok(json!({ "record_id": record_id, "patient_id": patient_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::workflow_data;

    fn registration(first: &str, last: &str, dob: &str) -> WorkflowData {
        workflow_data(&[
            ("first_name", json!(first)),
            ("last_name", json!(last)),
            ("date_of_birth", json!(dob)),
        ])
    }

    #[tokio::test]
    async fn test_register_patient() {
        let entities = Arc::new(EntityStore::new());
        let handler = PatientRegistrationHandler::new(entities.clone());

        let out = handler
            .handle(&registration("Ada", "Lovelace", "1815-12-10"), &HandlerContext::detached())
            .await
            .unwrap();

        let patient_id = out["patient_id"].as_str().unwrap();
        let stored = entities.get(PATIENTS, patient_id).unwrap();
        assert_eq!(stored["last_name"], "Lovelace");
        assert_eq!(stored["date_of_birth"], "1815-12-10");
        assert_eq!(stored["email"], Value::Null);
    }

    #[tokio::test]
    async fn test_duplicate_patient_conflicts() {
        let entities = Arc::new(EntityStore::new());
        let handler = PatientRegistrationHandler::new(entities.clone());
        let ctx = HandlerContext::detached();

        handler
            .handle(&registration("Ada", "Lovelace", "1815-12-10"), &ctx)
            .await
            .unwrap();
        let err = handler
            .handle(&registration("ADA", "lovelace", "1815-12-10"), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Conflict(_)));
        assert!(!err.is_retryable());
        assert_eq!(entities.count(PATIENTS), 1);
    }

    #[tokio::test]
    async fn test_bad_date_of_birth() {
        let handler = PatientRegistrationHandler::new(Arc::new(EntityStore::new()));
        let ctx = HandlerContext::detached();

        let err = handler
            .handle(&registration("Ada", "Lovelace", "10/12/1815"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));

        let err = handler
            .handle(&registration("Ada", "Lovelace", "2999-01-01"), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("in the future"));
    }

    #[tokio::test]
    async fn test_record_requires_known_patient() {
        let entities = Arc::new(EntityStore::new());
        let handler = RecordCreationHandler::new(entities.clone());
        let data = workflow_data(&[
            ("patient_id", json!("pat_missing")),
            ("record_type", json!("visit")),
        ]);

        let err = handler.handle(&data, &HandlerContext::detached()).await.unwrap_err();
        assert_eq!(err, HandlerError::NotFound("patient pat_missing".to_string()));
    }

    #[tokio::test]
    async fn test_record_created_for_patient() {
        let entities = Arc::new(EntityStore::new());
        entities.insert(PATIENTS, "pat_1", json!({"id": "pat_1"}));
        let handler = RecordCreationHandler::new(entities.clone());
        let data = workflow_data(&[
            ("patient_id", json!("pat_1")),
            ("record_type", json!("lab_result")),
            ("content", json!({"hba1c": 5.4})),
        ]);

        let out = handler.handle(&data, &HandlerContext::detached()).await.unwrap();
        let record = entities
            .get(RECORDS, out["record_id"].as_str().unwrap())
            .unwrap();
        assert_eq!(record["record_type"], "lab_result");
        assert_eq!(record["content"]["hba1c"], 5.4);
    }
}
