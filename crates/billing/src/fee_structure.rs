use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feeledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId, UserId, ValueObject,
};
use feeledger_events::Event;

use crate::period::AcademicYear;

const STRUCTURE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1e_2b4c_9a30_4d7e_8c51_3f0a_b2d4_e617);

/// Fee structure identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeStructureId(pub AggregateId);

impl FeeStructureId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Structures are unique per (tenant, academic year, name).
    pub fn for_definition(tenant_id: TenantId, academic_year: &AcademicYear, name: &str) -> Self {
        let key = format!(
            "{tenant_id}/{academic_year}/{}",
            name.trim().to_lowercase()
        );
        Self(AggregateId::from_natural_key(&STRUCTURE_NAMESPACE, &key))
    }
}

impl core::fmt::Display for FeeStructureId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for FeeStructureId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Tuition,
    Admission,
    Exam,
    Library,
    Transport,
    Hostel,
    Sports,
    Lab,
    Computer,
    Other,
}

/// How often a component is charged within an academic year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    OneTime,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

impl Frequency {
    /// Number of charges per academic year.
    pub fn multiplier(self) -> u64 {
        match self {
            Frequency::OneTime => 1,
            Frequency::Monthly => 12,
            Frequency::Quarterly => 4,
            Frequency::HalfYearly => 2,
            Frequency::Yearly => 1,
        }
    }

    /// Components billed on a periodic (monthly) invoice run.
    pub fn is_billed_per_period(self) -> bool {
        matches!(self, Frequency::Monthly | Frequency::OneTime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeComponent {
    pub name: String,
    pub component_type: ComponentType,
    /// Amount per charge, in minor currency units.
    pub amount: Money,
    pub frequency: Frequency,
    pub is_mandatory: bool,
    /// Day of month the charge falls due (1–28).
    pub due_day: u8,
}

impl ValueObject for FeeComponent {}

impl FeeComponent {
    fn validate(&self, idx: usize) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "component {idx}: name is required"
            )));
        }
        if !(1..=28).contains(&self.due_day) {
            return Err(DomainError::validation(format!(
                "component {idx}: due_day must be between 1 and 28"
            )));
        }
        Ok(())
    }

    /// Amount charged over a full academic year.
    pub fn annualized(&self) -> Result<Money, DomainError> {
        self.amount
            .checked_mul(self.frequency.multiplier())
            .ok_or_else(|| DomainError::invariant("annualized amount overflow"))
    }
}

/// Late-fee terms stored with a structure.
///
/// Recorded for reference only: generation and payment never apply them.
/// Late fees reach an invoice through an administrative edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeePolicy {
    pub amount: Money,
    pub grace_period_days: u32,
}

/// `annualTotal = Σ amount × multiplier(frequency)`.
pub fn annual_total(components: &[FeeComponent]) -> Result<Money, DomainError> {
    let annualized = components
        .iter()
        .map(FeeComponent::annualized)
        .collect::<Result<Vec<_>, _>>()?;
    Money::try_sum(annualized)
}

fn validate_components(components: &[FeeComponent]) -> Result<Money, DomainError> {
    if components.is_empty() {
        return Err(DomainError::validation(
            "fee structure requires at least one component",
        ));
    }
    for (idx, c) in components.iter().enumerate() {
        c.validate(idx)?;
    }
    annual_total(components)
}

fn normalize_groups(groups: &[String]) -> Vec<String> {
    let mut out: Vec<String> = groups
        .iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Aggregate root: FeeStructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeStructure {
    id: FeeStructureId,
    tenant_id: Option<TenantId>,
    name: String,
    academic_year: Option<AcademicYear>,
    cohort_groups: Vec<String>,
    description: Option<String>,
    components: Vec<FeeComponent>,
    late_fee: Option<LateFeePolicy>,
    annual_total: Money,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl FeeStructure {
    pub const AGGREGATE_TYPE: &'static str = "billing.fee_structure";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: FeeStructureId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            academic_year: None,
            cohort_groups: Vec::new(),
            description: None,
            components: Vec::new(),
            late_fee: None,
            annual_total: Money::ZERO,
            created_at: None,
            updated_at: None,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> FeeStructureId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn academic_year(&self) -> Option<&AcademicYear> {
        self.academic_year.as_ref()
    }

    pub fn cohort_groups(&self) -> &[String] {
        &self.cohort_groups
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn components(&self) -> &[FeeComponent] {
        &self.components
    }

    pub fn late_fee(&self) -> Option<&LateFeePolicy> {
        self.late_fee.as_ref()
    }

    pub fn annual_total(&self) -> Money {
        self.annual_total
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Live = defined and not deleted.
    pub fn is_live(&self) -> bool {
        self.created && !self.deleted
    }

    /// Components billed on periodic invoice runs (monthly + one-time).
    pub fn periodic_components(&self) -> impl Iterator<Item = &FeeComponent> {
        self.components
            .iter()
            .filter(|c| c.frequency.is_billed_per_period())
    }

    /// Live structure owned by `tenant_id`; anything else reads as not found.
    pub fn ensure_visible_to(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.is_live() || self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }
}

impl AggregateRoot for FeeStructure {
    type Id = FeeStructureId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DefineFeeStructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineFeeStructure {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub name: String,
    pub academic_year: AcademicYear,
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
    pub defined_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructurePatch {
    pub cohort_groups: Option<Vec<String>>,
    pub description: Option<String>,
    pub components: Option<Vec<FeeComponent>>,
    pub late_fee: Option<LateFeePolicy>,
}

impl FeeStructurePatch {
    pub fn is_empty(&self) -> bool {
        self.cohort_groups.is_none()
            && self.description.is_none()
            && self.components.is_none()
            && self.late_fee.is_none()
    }
}

/// Command: UpdateFeeStructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFeeStructure {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub patch: FeeStructurePatch,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteFeeStructure.
///
/// The dependent-invoice check happens in the catalog service before dispatch;
/// the aggregate cannot see invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFeeStructure {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStructureCommand {
    Define(DefineFeeStructure),
    Update(UpdateFeeStructure),
    Delete(DeleteFeeStructure),
}

/// Event: FeeStructureDefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructureDefined {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub name: String,
    pub academic_year: AcademicYear,
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
    pub annual_total: Money,
    pub defined_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FeeStructureUpdated (carries the full post-update mutable state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructureUpdated {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub cohort_groups: Vec<String>,
    pub description: Option<String>,
    pub components: Vec<FeeComponent>,
    pub late_fee: Option<LateFeePolicy>,
    pub annual_total: Money,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FeeStructureDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructureDeleted {
    pub tenant_id: TenantId,
    pub structure_id: FeeStructureId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStructureEvent {
    Defined(FeeStructureDefined),
    Updated(FeeStructureUpdated),
    Deleted(FeeStructureDeleted),
}

impl FeeStructureEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            FeeStructureEvent::Defined(e) => e.tenant_id,
            FeeStructureEvent::Updated(e) => e.tenant_id,
            FeeStructureEvent::Deleted(e) => e.tenant_id,
        }
    }
}

impl Event for FeeStructureEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FeeStructureEvent::Defined(_) => "billing.fee_structure.defined",
            FeeStructureEvent::Updated(_) => "billing.fee_structure.updated",
            FeeStructureEvent::Deleted(_) => "billing.fee_structure.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FeeStructureEvent::Defined(e) => e.occurred_at,
            FeeStructureEvent::Updated(e) => e.occurred_at,
            FeeStructureEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for FeeStructure {
    type Command = FeeStructureCommand;
    type Event = FeeStructureEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            FeeStructureEvent::Defined(e) => {
                self.id = e.structure_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.academic_year = Some(e.academic_year.clone());
                self.cohort_groups = e.cohort_groups.clone();
                self.description = e.description.clone();
                self.components = e.components.clone();
                self.late_fee = e.late_fee.clone();
                self.annual_total = e.annual_total;
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.deleted = false;
                self.created = true;
            }
            FeeStructureEvent::Updated(e) => {
                self.cohort_groups = e.cohort_groups.clone();
                self.description = e.description.clone();
                self.components = e.components.clone();
                self.late_fee = e.late_fee.clone();
                self.annual_total = e.annual_total;
                self.updated_at = Some(e.occurred_at);
            }
            FeeStructureEvent::Deleted(e) => {
                self.deleted = true;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            FeeStructureCommand::Define(cmd) => self.handle_define(cmd),
            FeeStructureCommand::Update(cmd) => self.handle_update(cmd),
            FeeStructureCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl FeeStructure {
    fn handle_define(&self, cmd: &DefineFeeStructure) -> Result<Vec<FeeStructureEvent>, DomainError> {
        if self.is_live() {
            return Err(DomainError::conflict(
                "a fee structure with this name already exists for the academic year",
            ));
        }
        if self.created && self.tenant_id != Some(cmd.tenant_id) {
            return Err(DomainError::not_found());
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("fee structure name is required"));
        }
        let annual_total = validate_components(&cmd.components)?;

        Ok(vec![FeeStructureEvent::Defined(FeeStructureDefined {
            tenant_id: cmd.tenant_id,
            structure_id: cmd.structure_id,
            name: name.to_string(),
            academic_year: cmd.academic_year.clone(),
            cohort_groups: normalize_groups(&cmd.cohort_groups),
            description: cmd.description.clone(),
            components: cmd.components.clone(),
            late_fee: cmd.late_fee.clone(),
            annual_total,
            defined_by: cmd.defined_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateFeeStructure) -> Result<Vec<FeeStructureEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;

        let patch = &cmd.patch;
        if patch.is_empty() {
            return Err(DomainError::validation("update contains no changes"));
        }

        let components = patch
            .components
            .clone()
            .unwrap_or_else(|| self.components.clone());
        let annual_total = validate_components(&components)?;

        let cohort_groups = match &patch.cohort_groups {
            Some(groups) => normalize_groups(groups),
            None => self.cohort_groups.clone(),
        };

        Ok(vec![FeeStructureEvent::Updated(FeeStructureUpdated {
            tenant_id: cmd.tenant_id,
            structure_id: cmd.structure_id,
            cohort_groups,
            description: patch.description.clone().or_else(|| self.description.clone()),
            components,
            late_fee: patch.late_fee.clone().or_else(|| self.late_fee.clone()),
            annual_total,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteFeeStructure) -> Result<Vec<FeeStructureEvent>, DomainError> {
        self.ensure_visible_to(cmd.tenant_id)?;

        Ok(vec![FeeStructureEvent::Deleted(FeeStructureDeleted {
            tenant_id: cmd.tenant_id,
            structure_id: cmd.structure_id,
            deleted_by: cmd.deleted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
