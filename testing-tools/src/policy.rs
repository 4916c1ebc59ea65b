//! A policy mock that always returns a scripted outcome, for exercising the
//! scheduler without routing through [`txm_policy::SimplePolicy`]'s real
//! submit-once behavior.

use async_trait::async_trait;
use txm_connector::Connector;
use txm_policy::{PolicyContext, PolicyEngine, PolicyOutcome};
use txm_types::ManagedTx;

pub struct ScriptedPolicy<F>(pub F)
where
    F: Fn(&ManagedTx) -> PolicyOutcome + Send + Sync;

#[async_trait]
impl<F> PolicyEngine for ScriptedPolicy<F>
where
    F: Fn(&ManagedTx) -> PolicyOutcome + Send + Sync + 'static
{
    async fn execute(
        &self,
        _ctx: &PolicyContext,
        _connector: &dyn Connector,
        mtx: &mut ManagedTx
    ) -> PolicyOutcome {
        (self.0)(mtx)
    }
}
