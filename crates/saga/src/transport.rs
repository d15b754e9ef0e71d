//! Transport for forward saga-step calls.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::definition::SagaRequest;

/// A forward call to a participant failed.
#[derive(Debug, Error)]
#[error("Transport call {service_name}.{operation} failed: {reason}")]
pub struct TransportError {
    pub service_name: String,
    pub operation: String,
    pub reason: String,
}

/// Performs one remote saga-step call.
///
/// The engine does not care how the call travels (HTTP, RPC); it consumes
/// a binary success/failure result plus an optional response payload that
/// is stored as event payload bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, request: &SagaRequest) -> Result<Vec<u8>, TransportError>;
}

/// In-memory transport double with per-operation failure switches.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    invocations: Arc<Mutex<Vec<String>>>,
    failing_operations: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes invocations of the given operation fail until cleared.
    pub async fn set_fail_on(&self, operation: impl Into<String>) {
        self.failing_operations.lock().await.insert(operation.into());
    }

    /// Clears a failure switch.
    pub async fn clear_fail_on(&self, operation: &str) {
        self.failing_operations.lock().await.remove(operation);
    }

    /// Returns how many times the given operation was invoked.
    pub async fn invocation_count(&self, operation: &str) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|o| o.as_str() == operation)
            .count()
    }

    /// Returns the invoked operations in call order.
    pub async fn invocations(&self) -> Vec<String> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn invoke(&self, request: &SagaRequest) -> Result<Vec<u8>, TransportError> {
        if self.failing_operations.lock().await.contains(&request.operation) {
            return Err(TransportError {
                service_name: request.service_name.clone(),
                operation: request.operation.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        self.invocations.lock().await.push(request.operation.clone());
        Ok(format!("{{\"ok\":\"{}\"}}", request.operation).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(operation: &str) -> SagaRequest {
        SagaRequest {
            id: format!("req-{operation}"),
            service_name: "svc".to_string(),
            operation: operation.to_string(),
            payload: Vec::new(),
            compensation_method: "undo".to_string(),
        }
    }

    #[tokio::test]
    async fn records_invocations() {
        let transport = InMemoryTransport::new();
        transport.invoke(&request("reserve")).await.unwrap();
        transport.invoke(&request("charge")).await.unwrap();
        transport.invoke(&request("reserve")).await.unwrap();

        assert_eq!(transport.invocation_count("reserve").await, 2);
        assert_eq!(transport.invocations().await, vec!["reserve", "charge", "reserve"]);
    }

    #[tokio::test]
    async fn fail_switch_is_per_operation() {
        let transport = InMemoryTransport::new();
        transport.set_fail_on("charge").await;

        assert!(transport.invoke(&request("reserve")).await.is_ok());
        assert!(transport.invoke(&request("charge")).await.is_err());
        // Failed calls are not counted as invocations.
        assert_eq!(transport.invocation_count("charge").await, 0);

        transport.clear_fail_on("charge").await;
        assert!(transport.invoke(&request("charge")).await.is_ok());
    }
}
