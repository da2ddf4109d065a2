//! Fee catalog: define, update, delete and read fee structures.

use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use feeledger_billing::{
    AcademicYear, DefineFeeStructure, DeleteFeeStructure, FeeComponent, FeeStructure,
    FeeStructureCommand, FeeStructureId, FeeStructurePatch, LateFeePolicy, UpdateFeeStructure,
};
use feeledger_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::engine::{BillingContext, BillingEngine, BillingError, BillingResult};
use crate::event_store::EventStore;
use crate::projections::FeeStructureReadModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineStructure {
    pub name: String,
    pub academic_year: AcademicYear,
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
}

impl<S, B> BillingEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip(self, request), fields(tenant_id = %ctx.tenant_id, name = %request.name))]
    pub fn define_structure(
        &self,
        ctx: &BillingContext,
        request: DefineStructure,
    ) -> BillingResult<FeeStructureReadModel> {
        let structure_id =
            FeeStructureId::for_definition(ctx.tenant_id, &request.academic_year, &request.name);
        let cmd = FeeStructureCommand::Define(DefineFeeStructure {
            tenant_id: ctx.tenant_id,
            structure_id,
            name: request.name,
            academic_year: request.academic_year,
            cohort_groups: request.cohort_groups,
            description: request.description,
            components: request.components,
            late_fee: request.late_fee,
            defined_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });

        // Two concurrent definitions of one name race on an empty stream; the
        // loser is a duplicate, not a retryable conflict.
        self.execute(
            ctx.tenant_id,
            structure_id.0,
            FeeStructure::AGGREGATE_TYPE,
            &cmd,
            false,
            |_, id| FeeStructure::empty(FeeStructureId::new(id)),
        )
        .map_err(|e| match e {
            DispatchError::Concurrency(_) => DispatchError::Conflict(
                "a fee structure with this name already exists for the academic year".to_string(),
            ),
            other => other,
        })?;

        let view = self.structure_view(ctx, structure_id)?;
        info!(structure_id = %structure_id, annual_total = view.annual_total.minor(), "fee structure defined");
        Ok(view)
    }

    #[instrument(skip(self, patch), fields(tenant_id = %ctx.tenant_id, structure_id = %structure_id))]
    pub fn update_structure(
        &self,
        ctx: &BillingContext,
        structure_id: FeeStructureId,
        patch: FeeStructurePatch,
    ) -> BillingResult<FeeStructureReadModel> {
        let cmd = FeeStructureCommand::Update(UpdateFeeStructure {
            tenant_id: ctx.tenant_id,
            structure_id,
            patch,
            updated_by: ctx.actor_id,
            occurred_at: self.clock.now(),
        });
        self.execute(
            ctx.tenant_id,
            structure_id.0,
            FeeStructure::AGGREGATE_TYPE,
            &cmd,
            true,
            |_, id| FeeStructure::empty(FeeStructureId::new(id)),
        )?;

        let view = self.structure_view(ctx, structure_id)?;
        info!(annual_total = view.annual_total.minor(), "fee structure updated");
        Ok(view)
    }

    /// Delete a structure that no invoice references.
    ///
    /// The structure lock is held across the dependency check and the delete,
    /// and generation holds the same lock for its whole run.
    #[instrument(skip(self), fields(tenant_id = %ctx.tenant_id, structure_id = %structure_id))]
    pub fn delete_structure(
        &self,
        ctx: &BillingContext,
        structure_id: FeeStructureId,
    ) -> BillingResult<()> {
        self.locks.with_lock(ctx.tenant_id, structure_id.0, || {
            let structure = self.load_structure(ctx.tenant_id, structure_id)?;
            structure.ensure_visible_to(ctx.tenant_id)?;

            let dependents = self
                .projections
                .invoices
                .count_for_structure(ctx.tenant_id, structure_id);
            if dependents > 0 {
                return Err(BillingError::from(DispatchError::Conflict(format!(
                    "fee structure is referenced by {dependents} invoice(s)"
                ))));
            }

            let cmd = FeeStructureCommand::Delete(DeleteFeeStructure {
                tenant_id: ctx.tenant_id,
                structure_id,
                deleted_by: ctx.actor_id,
                occurred_at: self.clock.now(),
            });
            self.execute_locked(
                ctx.tenant_id,
                structure_id.0,
                FeeStructure::AGGREGATE_TYPE,
                &cmd,
                false,
                |_, id| FeeStructure::empty(FeeStructureId::new(id)),
            )?;
            info!("fee structure deleted");
            Ok(())
        })
    }

    pub fn get_structure(
        &self,
        ctx: &BillingContext,
        structure_id: FeeStructureId,
    ) -> BillingResult<FeeStructureReadModel> {
        self.projections
            .fee_structures
            .get(ctx.tenant_id, &structure_id)
            .ok_or_else(BillingError::not_found)
    }

    pub fn list_structures(
        &self,
        ctx: &BillingContext,
        academic_year: Option<&AcademicYear>,
    ) -> Vec<FeeStructureReadModel> {
        self.projections
            .fee_structures
            .list(ctx.tenant_id, academic_year)
    }

    /// Current state straight from the stream, independent of projection lag.
    fn structure_view(
        &self,
        ctx: &BillingContext,
        structure_id: FeeStructureId,
    ) -> BillingResult<FeeStructureReadModel> {
        let structure = self.load_structure(ctx.tenant_id, structure_id)?;
        FeeStructureReadModel::from_structure(&structure).ok_or_else(BillingError::not_found)
    }
}
