//! `BillingEngine`: the write path (dispatcher + per-stream locks) wired to the
//! synchronously fed read side.
//!
//! Operations are grouped by concern in `services::{catalog, generator, ledger,
//! reporting}`; this module holds the shared plumbing.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::error;

use feeledger_billing::{FeeStructure, FeeStructureId, Invoice, InvoiceEvent, InvoiceId};
use feeledger_core::{Aggregate, AggregateId, Clock, DomainError, SystemClock, TenantId, UserId};
use feeledger_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::BillingConfig;
use crate::directory::{CohortDirectory, DirectoryError};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent};
use crate::locks::StreamLocks;
use crate::numbering::{InMemoryInvoiceNumbers, InvoiceNumberSequence};
use crate::projections::BillingProjections;

/// Tenant and actor of the caller, resolved upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingContext {
    pub tenant_id: TenantId,
    pub actor_id: UserId,
}

impl BillingContext {
    pub fn new(tenant_id: TenantId, actor_id: UserId) -> Self {
        Self {
            tenant_id,
            actor_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl From<DomainError> for BillingError {
    fn from(value: DomainError) -> Self {
        BillingError::Dispatch(value.into())
    }
}

impl BillingError {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Dispatch(e) => e.kind(),
            BillingError::Directory(_) => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            BillingError::Dispatch(e) => e.message(),
            BillingError::Directory(_) => "cohort directory unavailable".to_string(),
        }
    }

    pub fn not_found() -> Self {
        BillingError::Dispatch(DispatchError::NotFound)
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

pub type InMemoryBillingEngine =
    BillingEngine<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

pub struct BillingEngine<S, B> {
    pub(crate) dispatcher: CommandDispatcher<S, B>,
    pub(crate) projections: BillingProjections,
    pub(crate) directory: Arc<dyn CohortDirectory>,
    pub(crate) numbering: Arc<dyn InvoiceNumberSequence>,
    /// Tenants whose stored invoice numbers have been fed to `numbering`.
    numbered_tenants: Mutex<HashSet<TenantId>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: StreamLocks,
    pub(crate) config: BillingConfig,
}

impl<S, B> fmt::Debug for BillingEngine<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl InMemoryBillingEngine {
    /// Engine over the in-memory store and bus with the wall clock.
    pub fn in_memory(directory: Arc<dyn CohortDirectory>, config: BillingConfig) -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            directory,
            Arc::new(SystemClock),
            config,
        )
    }
}

impl<S, B> BillingEngine<S, B> {
    pub fn new(
        store: S,
        bus: B,
        directory: Arc<dyn CohortDirectory>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        let numbering = Arc::new(InMemoryInvoiceNumbers::new(config.invoice_prefix.clone()));
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            projections: BillingProjections::new(),
            directory,
            numbering,
            numbered_tenants: Mutex::new(HashSet::new()),
            clock,
            locks: StreamLocks::new(),
            config,
        }
    }

    pub fn with_numbering(mut self, numbering: Arc<dyn InvoiceNumberSequence>) -> Self {
        self.numbering = numbering;
        self.numbered_tenants = Mutex::new(HashSet::new());
        self
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn projections(&self) -> &BillingProjections {
        &self.projections
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }
}

impl<S, B> BillingEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Commit under the stream lock, feed the committed events to the read
    /// side, then publish them, all before the lock is released.
    pub(crate) fn execute<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        retry: bool,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        self.locks.with_lock(tenant_id, aggregate_id, || {
            self.execute_locked(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                retry,
                make_aggregate,
            )
        })
    }

    /// `execute` for callers already holding the stream lock.
    pub(crate) fn execute_locked<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        retry: bool,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: feeledger_events::Event + Serialize + DeserializeOwned,
    {
        let committed = if retry {
            self.dispatcher.commit_with_retry(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                self.config.retry_limit,
                make_aggregate,
            )?
        } else {
            self.dispatcher
                .commit(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)?
        };
        self.project(&committed);
        self.dispatcher.publish(&committed);
        Ok(committed)
    }

    /// Projection failures never fail a committed write; a rebuild repairs them.
    fn project(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.projections.apply_envelope(&stored.to_envelope()) {
                error!(
                    tenant_id = %stored.tenant_id,
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = %e,
                    "projection apply failed"
                );
            }
        }
    }

    pub(crate) fn load_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, DispatchError> {
        self.dispatcher
            .load(tenant_id, invoice_id.0, |_, id| Invoice::empty(InvoiceId::new(id)))
    }

    pub(crate) fn load_structure(
        &self,
        tenant_id: TenantId,
        structure_id: FeeStructureId,
    ) -> Result<FeeStructure, DispatchError> {
        self.dispatcher.load(tenant_id, structure_id.0, |_, id| {
            FeeStructure::empty(FeeStructureId::new(id))
        })
    }

    /// Replay the whole store into fresh read models.
    pub fn rebuild_projections(&self, tenant_id: TenantId) -> BillingResult<()> {
        let history = self
            .dispatcher
            .store()
            .load_tenant(tenant_id)
            .map_err(DispatchError::from)?;
        self.mark_numbered(tenant_id, &history);
        let envelopes = history.iter().map(StoredEvent::to_envelope).collect::<Vec<_>>();
        self.projections.rebuild_from_scratch(envelopes).map_err(|e| {
            DispatchError::Store(EventStoreError::Backend(format!("rebuild failed: {e}")))
        })?;
        Ok(())
    }

    /// Advance the number sequence past every invoice the store already holds
    /// for `tenant_id`. Runs once per tenant and engine.
    pub(crate) fn ensure_numbering_seeded(&self, tenant_id: TenantId) -> Result<(), DispatchError> {
        let mut numbered = match self.numbered_tenants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if numbered.contains(&tenant_id) {
            return Ok(());
        }
        let history = self.dispatcher.store().load_tenant(tenant_id)?;
        self.observe_issued(&history);
        numbered.insert(tenant_id);
        Ok(())
    }

    fn mark_numbered(&self, tenant_id: TenantId, history: &[StoredEvent]) {
        let mut numbered = match self.numbered_tenants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.observe_issued(history);
        numbered.insert(tenant_id);
    }

    fn observe_issued(&self, history: &[StoredEvent]) {
        for stored in history
            .iter()
            .filter(|e| e.aggregate_type == Invoice::AGGREGATE_TYPE)
        {
            if let Ok(InvoiceEvent::InvoiceIssued(e)) =
                serde_json::from_value::<InvoiceEvent>(stored.payload.clone())
            {
                self.numbering
                    .observe(e.tenant_id, &e.period.academic_year, &e.invoice_number);
            }
        }
    }
}

/// Decode the committed events of one command back into their domain type.
pub(crate) fn decode<E: DeserializeOwned>(committed: &[StoredEvent]) -> Result<Vec<E>, DispatchError> {
    committed
        .iter()
        .map(|stored| {
            serde_json::from_value(stored.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))
        })
        .collect()
}
