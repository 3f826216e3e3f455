//! Input validation run before any handler is invoked

use super::record::WorkflowData;
use crate::config::OrchestratorConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of validating a workflow payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// Whether the payload may be handed to a handler
    pub ok: bool,
    /// Required fields that were absent or null, in rule order
    pub missing_fields: Vec<String>,
}

impl ValidationOutcome {
    /// A passing outcome
    pub fn valid() -> Self {
        Self {
            ok: true,
            missing_fields: Vec::new(),
        }
    }

    /// A failing outcome listing the missing fields
    pub fn missing(missing_fields: Vec<String>) -> Self {
        Self {
            ok: missing_fields.is_empty(),
            missing_fields,
        }
    }
}

/// Checks a payload against the rules for its workflow type
pub trait Validator: Send + Sync {
    /// Validate `data` for `workflow_type`
    fn validate(&self, workflow_type: &str, data: &WorkflowData) -> ValidationOutcome;
}

/// Validator driven by a table of required top-level keys
///
/// A key counts as missing when absent or explicitly `null`. Workflow types
/// without an entry in the table pass unconditionally.
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldsValidator {
    rules: BTreeMap<String, Vec<String>>,
}

impl RequiredFieldsValidator {
    /// Build from an explicit rule table
    pub fn new(rules: BTreeMap<String, Vec<String>>) -> Self {
        Self { rules }
    }

    /// Build from the rule table in the orchestrator configuration
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.required_fields.clone())
    }

    /// Required fields for a workflow type
    pub fn required_fields(&self, workflow_type: &str) -> &[String] {
        self.rules
            .get(workflow_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Validator for RequiredFieldsValidator {
    fn validate(&self, workflow_type: &str, data: &WorkflowData) -> ValidationOutcome {
        let missing = self
            .required_fields(workflow_type)
            .iter()
            .filter(|field| data.get(field.as_str()).map_or(true, |v| v.is_null()))
            .cloned()
            .collect();
        ValidationOutcome::missing(missing)
    }
}
