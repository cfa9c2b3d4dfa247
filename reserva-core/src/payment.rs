use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EngineResult;
use reserva_domain::payment::PaymentMethod;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Completed,
    Processing,
    Failed,
}

/// What the provider reports back for a charge or refund attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayReceipt {
    pub status: GatewayStatus,
    pub external_reference: Option<String>,
}

/// Adapter over the external payment provider.
///
/// Implementations return `Ok` with a `Failed` receipt for an explicit
/// decline and `Err(EngineError::Payment { retryable: true, .. })` for
/// transport-level failures, so the retry policy only re-attempts the
/// latter.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn process(
        &self,
        amount_cents: i64,
        method: &PaymentMethod,
        payer_id: Uuid,
    ) -> EngineResult<GatewayReceipt>;

    async fn refund(
        &self,
        external_reference: &str,
        amount_cents: i64,
    ) -> EngineResult<GatewayReceipt>;
}
