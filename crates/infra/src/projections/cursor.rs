//! Per-stream projection cursors.
//!
//! A cursor is the last `sequence_number` a projection applied for one
//! `(tenant, aggregate)` stream. Envelopes at or below the cursor are ignored,
//! which makes projections safe under at-least-once delivery and lets the
//! engine apply synchronously while a bus subscriber applies the same events.

use std::collections::HashMap;
use std::sync::RwLock;

use feeledger_core::{AggregateId, TenantId};

use super::ProjectionError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    Apply,
    AlreadySeen,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    /// Decide whether `seq` is the next envelope for this stream.
    pub fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let last = self.get(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::AlreadySeen);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut m) = self.inner.write() {
            m.insert((tenant_id, aggregate_id), seq);
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut m) = self.inner.write() {
            m.retain(|(t, _), _| *t != tenant_id);
        }
    }
}
