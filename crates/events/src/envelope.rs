use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feeledger_core::{AggregateId, TenantId};

/// Envelope for a committed event, carrying tenant + stream metadata.
///
/// - `tenant_id` is the isolation boundary; consumers must never mix tenants.
/// - `sequence_number` is monotonically increasing per (tenant, aggregate) stream.
/// - `payload` is the serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    sequence_number: u64,
    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_stream_metadata() {
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            "billing.invoice",
            3,
            "billing.invoice.payment_recorded",
            Utc::now(),
            serde_json::json!({"amount": 450}),
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["aggregate_type"], "billing.invoice");
        assert_eq!(json["sequence_number"], 3);
        assert_eq!(json["payload"]["amount"], 450);
        assert_eq!(env.tenant_id(), tenant_id);
    }
}
