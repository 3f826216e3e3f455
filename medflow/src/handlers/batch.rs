//! Bulk processing of heterogeneous workflow items

use super::BATCH_PROCESSING;
use crate::workflow::{
    Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult, Validator,
    WorkflowData,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Largest batch accepted in one workflow
pub const MAX_BATCH_ITEMS: usize = 500;

/// Runs `{workflow_type, data}` items one after another
///
/// Items are validated with the same rules as top-level workflows and run
/// once each through their handler; item failures are reported in the
/// summary rather than failing the batch. Nested batches are not supported
/// because the item registry does not contain this handler.
pub struct BatchProcessingHandler {
    items: HandlerRegistry,
    validator: Arc<dyn Validator>,
}

impl BatchProcessingHandler {
    /// Handler dispatching items through `items`
    pub fn new(items: HandlerRegistry, validator: Arc<dyn Validator>) -> Self {
        Self { items, validator }
    }

    async fn run_item(&self, index: usize, item: &Value, ctx: &HandlerContext) -> Value {
        let Some(item) = item.as_object() else {
            return item_failure(index, None, "invalid_item", "item must be an object");
        };
        let Some(workflow_type) = item.get("workflow_type").and_then(Value::as_str) else {
            return item_failure(index, None, "invalid_item", "item has no workflow_type");
        };
        let data: WorkflowData = match item.get("data") {
            None | Some(Value::Null) => WorkflowData::new(),
            Some(Value::Object(fields)) => fields.clone().into_iter().collect(),
            Some(_) => {
                return item_failure(
                    index,
                    Some(workflow_type),
                    "invalid_item",
                    "item data must be an object",
                )
            }
        };

        let validation = self.validator.validate(workflow_type, &data);
        if !validation.ok {
            let message = format!("missing {}", validation.missing_fields.join(", "));
            return item_failure(index, Some(workflow_type), "validation_failed", &message);
        }

        let Some(handler) = self.items.get(workflow_type) else {
            return item_failure(
                index,
                Some(workflow_type),
                "unsupported_workflow",
                "no handler for this item type",
            );
        };

        match handler.handle(&data, ctx).await {
            Ok(result) => json!({
                "index": index,
                "workflow_type": workflow_type,
                "success": true,
                "result": result,
            }),
            Err(error) => json!({
                "index": index,
                "workflow_type": workflow_type,
                "success": false,
                "error": error.summary(),
            }),
        }
    }
}

fn item_failure(index: usize, workflow_type: Option<&str>, kind: &str, message: &str) -> Value {
    json!({
        "index": index,
        "workflow_type": workflow_type,
        "success": false,
        "error": { "kind": kind, "message": message, "retryable": false },
    })
}

#[async_trait]
impl Handler for BatchProcessingHandler {
    fn workflow_type(&self) -> &str {
        BATCH_PROCESSING
    }

    fn description(&self) -> &str {
        "Run a list of workflow items and summarize their outcomes"
    }

    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        let items = match data.get("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(HandlerError::InvalidInput(format!(
                    "items must be an array, got {}",
                    other
                )))
            }
            None => return Err(HandlerError::InvalidInput("items is required".to_string())),
        };
        if items.is_empty() {
            return Err(HandlerError::InvalidInput("batch contains no items".to_string()));
        }
        if items.len() > MAX_BATCH_ITEMS {
            return Err(HandlerError::InvalidInput(format!(
                "batch has {} items, the limit is {}",
                items.len(),
                MAX_BATCH_ITEMS
            )));
        }

        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(processed = index, "batch stopped by cancellation");
                return Err(HandlerError::Cancelled);
            }
            outcomes.push(self.run_item(index, item, ctx).await);
        }

        let succeeded = outcomes
            .iter()
            .filter(|outcome| outcome["success"] == true)
            .count();
        tracing::info!(total = items.len(), succeeded, "batch processed");

        Ok(json!({
            "total": items.len(),
            "succeeded": succeeded,
            "failed": items.len() - succeeded,
            "items": outcomes,
        }))
    }
}
