//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply history)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append to store with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Once step 4 succeeds the command has happened. A publish failure in step 5
//! is logged and never turned into an error: the store is the source of truth
//! and the bus is at-least-once.
//!
//! Step 4 is where both uniqueness (issue into an empty stream) and per-invoice
//! serialization (two payments decided against the same version) are enforced.
//! A lost race surfaces as `DispatchError::Concurrency`; `dispatch_with_retry`
//! reloads and re-decides so the loser is judged against fresh state.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use feeledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use feeledger_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stream version moved between load and append.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// Cross-tenant or cross-aggregate stream mixing detected.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    /// Historical payload could not be decoded into the aggregate event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl DispatchError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Concurrency(_) | DispatchError::Conflict(_) => "conflict",
            DispatchError::Validation(_) => "validation_error",
            DispatchError::InvariantViolation(_) => "invariant_violation",
            DispatchError::BadRequest(_) => "bad_request",
            DispatchError::Unauthorized => "unauthorized",
            DispatchError::NotFound | DispatchError::TenantIsolation(_) => "not_found",
            DispatchError::Deserialize(_) | DispatchError::Store(_) => {
                "internal_error"
            }
        }
    }

    /// Human-readable message safe to return across the tenant boundary.
    pub fn message(&self) -> String {
        match self {
            DispatchError::Validation(msg)
            | DispatchError::InvariantViolation(msg)
            | DispatchError::Conflict(msg)
            | DispatchError::BadRequest(msg) => msg.clone(),
            DispatchError::Concurrency(_) => {
                "the record was modified concurrently; retry the request".to_string()
            }
            DispatchError::NotFound | DispatchError::TenantIsolation(_) => "not found".to_string(),
            DispatchError::Unauthorized => "unauthorized".to_string(),
            DispatchError::Deserialize(_) | DispatchError::Store(_) => {
                "internal error".to_string()
            }
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::BadRequest(msg) => DispatchError::BadRequest(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run on `InMemoryEventStore` /
/// `InMemoryEventBus` and production swaps in `PostgresEventStore`.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without issuing a command.
    ///
    /// A stream that does not exist in `tenant_id` rehydrates to the empty aggregate.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// Returns the committed events; an empty vector means the aggregate accepted
    /// the command as a no-op (e.g. a replayed idempotency key).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        let committed = self.commit(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)?;
        self.publish(&committed);
        Ok(committed)
    }

    /// `dispatch`, retried on `Concurrency` up to `retry_limit` extra attempts.
    ///
    /// Each retry reloads the stream, so the command is re-decided against the
    /// state that won the race.
    pub fn dispatch_with_retry<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        retry_limit: u32,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        let committed = self.commit_with_retry(
            tenant_id,
            aggregate_id,
            aggregate_type,
            command,
            retry_limit,
            make_aggregate,
        )?;
        self.publish(&committed);
        Ok(committed)
    }

    /// Steps 1 to 4: decide and append, without publishing.
    pub fn commit<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.store.append(uncommitted, expected)?)
    }

    /// `commit`, retried on `Concurrency` up to `retry_limit` extra attempts.
    pub fn commit_with_retry<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        retry_limit: u32,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            match self.commit(tenant_id, aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(_)) if attempt < retry_limit => {
                    attempt += 1;
                    debug!(%tenant_id, %aggregate_id, attempt, "retrying after concurrent modification");
                }
                Err(DispatchError::Concurrency(msg)) => {
                    warn!(%tenant_id, %aggregate_id, attempt, "giving up after concurrent modifications");
                    return Err(DispatchError::Concurrency(msg));
                }
                other => return other,
            }
        }
    }

    /// Step 5. The events are already committed, so a failed publish is logged
    /// and left for redelivery from the store.
    pub fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    tenant_id = %stored.tenant_id,
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "event publication failed after commit"
                );
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_kind() {
        let err: DispatchError = DomainError::bad_request("payment exceeds due amount").into();
        assert_eq!(err.kind(), "bad_request");
        assert_eq!(err.message(), "payment exceeds due amount");

        let err: DispatchError = DomainError::conflict("duplicate").into();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn isolation_failures_read_as_not_found() {
        let err = DispatchError::TenantIsolation("tenant 1234 leaked".to_string());
        assert_eq!(err.kind(), "not_found");
        assert!(!err.message().contains("1234"));
    }

    #[test]
    fn store_failures_do_not_leak_details() {
        let err: DispatchError = EventStoreError::Backend("password=hunter2".to_string()).into();
        assert_eq!(err.kind(), "internal_error");
        assert_eq!(err.message(), "internal error");
    }
}
