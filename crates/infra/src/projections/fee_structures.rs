use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use feeledger_billing::{
    AcademicYear, FeeComponent, FeeStructure, FeeStructureEvent, FeeStructureId, LateFeePolicy,
};
use feeledger_core::{Money, TenantId};
use feeledger_events::EventEnvelope;

use super::ProjectionError;
use super::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable fee structure (catalog entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeStructureReadModel {
    pub structure_id: FeeStructureId,
    pub name: String,
    pub academic_year: AcademicYear,
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
    pub annual_total: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeStructureReadModel {
    /// Snapshot of a live structure; `None` when undefined or deleted.
    pub fn from_structure(structure: &FeeStructure) -> Option<Self> {
        if !structure.is_live() {
            return None;
        }
        Some(Self {
            structure_id: structure.id_typed(),
            name: structure.name().to_string(),
            academic_year: structure.academic_year()?.clone(),
            cohort_groups: structure.cohort_groups().to_vec(),
            description: structure.description().map(str::to_string),
            components: structure.components().to_vec(),
            late_fee: structure.late_fee().cloned(),
            annual_total: structure.annual_total(),
            created_at: structure.created_at()?,
            updated_at: structure.updated_at()?,
        })
    }
}

#[derive(Debug)]
pub struct FeeStructuresProjection<S>
where
    S: TenantStore<FeeStructureId, FeeStructureReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> FeeStructuresProjection<S>
where
    S: TenantStore<FeeStructureId, FeeStructureReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: &FeeStructureId) -> Option<FeeStructureReadModel> {
        self.store.get(tenant_id, id)
    }

    /// Structures ordered by academic year, then name.
    pub fn list(
        &self,
        tenant_id: TenantId,
        academic_year: Option<&AcademicYear>,
    ) -> Vec<FeeStructureReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|s| academic_year.is_none_or(|y| &s.academic_year == y))
            .collect();
        rows.sort_by(|a, b| {
            (&a.academic_year, &a.name).cmp(&(&b.academic_year, &b.name))
        });
        rows
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != FeeStructure::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(tenant_id, aggregate_id, seq)? == CursorCheck::AlreadySeen {
            return Ok(());
        }

        let ev: FeeStructureEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        if ev.tenant_id() != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            FeeStructureEvent::Defined(e) => {
                self.store.upsert(
                    tenant_id,
                    e.structure_id,
                    FeeStructureReadModel {
                        structure_id: e.structure_id,
                        name: e.name,
                        academic_year: e.academic_year,
                        cohort_groups: e.cohort_groups,
                        description: e.description,
                        components: e.components,
                        late_fee: e.late_fee,
                        annual_total: e.annual_total,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            FeeStructureEvent::Updated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.structure_id) {
                    rm.cohort_groups = e.cohort_groups;
                    rm.description = e.description;
                    rm.components = e.components;
                    rm.late_fee = e.late_fee;
                    rm.annual_total = e.annual_total;
                    rm.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, e.structure_id, rm);
                }
            }
            FeeStructureEvent::Deleted(e) => {
                self.store.remove(tenant_id, &e.structure_id);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
