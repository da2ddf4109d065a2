use feeledger_core::{TenantId, UserId};
use feeledger_infra::BillingContext;

/// Tenant context for a request.
///
/// This is immutable and must be present for all billing routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Acting user, as asserted by the upstream gateway.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: UserId,
}

impl ActorContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }
}

pub fn billing_context(tenant: TenantContext, actor: ActorContext) -> BillingContext {
    BillingContext::new(tenant.tenant_id(), actor.actor_id())
}
