//! Declarative saga definitions and their interpretation.
//!
//! A definition is a JSON document naming an ordered list of requests,
//! each paired with its compensation method:
//!
//! ```json
//! {
//!   "requests": [
//!     {
//!       "id": "reserve-inventory",
//!       "serviceName": "inventory",
//!       "operation": "reserve",
//!       "payload": { "sku": "A-1", "quantity": 2 },
//!       "compensation": { "method": "release" }
//!     }
//!   ]
//! }
//! ```
//!
//! Interpretation is a pure function from definition text to request
//! descriptors; it performs no I/O.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// A parsed saga definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub requests: Vec<RequestDef>,
}

/// One request node of a definition. Field names on the wire are
/// camelCase, matching the definitions participants already write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDef {
    /// Definition-unique name; the request's local transaction id is
    /// derived from it, so it must be stable across restarts.
    pub id: String,

    /// The participant service owning the operation.
    pub service_name: String,

    /// The forward operation to invoke.
    pub operation: String,

    /// Arguments for the forward call, forwarded verbatim to the
    /// compensation call as well.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// How to undo the request once completed.
    pub compensation: CompensationDef,
}

/// The undo half of a request node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationDef {
    pub method: String,
}

/// A request descriptor ready for execution.
#[derive(Debug, Clone)]
pub struct SagaRequest {
    pub id: String,
    pub service_name: String,
    pub operation: String,
    pub payload: Vec<u8>,
    pub compensation_method: String,
}

/// Interprets definition text into an ordered set of request descriptors.
///
/// Rejects empty request lists and duplicate request ids. A failure here
/// is fatal only to the `run` call that supplied the definition.
pub fn interpret(definition_json: &str) -> Result<Vec<SagaRequest>> {
    let definition: SagaDefinition = serde_json::from_str(definition_json)
        .map_err(|e| SagaError::Definition(e.to_string()))?;

    if definition.requests.is_empty() {
        return Err(SagaError::Definition(
            "definition contains no requests".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for request in &definition.requests {
        if !seen.insert(request.id.as_str()) {
            return Err(SagaError::Definition(format!(
                "duplicate request id {:?}",
                request.id
            )));
        }
    }

    definition
        .requests
        .into_iter()
        .map(|request| {
            let payload = serde_json::to_vec(&request.payload)?;
            Ok(SagaRequest {
                id: request.id,
                service_name: request.service_name,
                operation: request.operation,
                payload,
                compensation_method: request.compensation.method,
            })
        })
        .collect()
}
