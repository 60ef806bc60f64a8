//! Public-edge bootstrap RPC (`spec.md` §4.L): register once a transport
//! becomes live, forward pushed config-updates to the Orchestrator, and
//! unregister while draining.

use std::time::Duration;

use ferrule_core::context::ExecutionContext;
use ferrule_core::error::{CoreError, ErrorKind};
use ferrule_router::{Orchestrator, RuleSet};
use ferrule_transport::connection::CloseReason;
use ferrule_transport::transport::{RegisterReply, RegisterRequest, Transport};

/// Drives the one-shot `register` RPC against `rpc_timeout`. A timeout is
/// reported as a distinct error code so the Connection Worker can fold it
/// into the same `dialing`-failure path as any other registration failure
/// (`spec.md` §4.L: "on RPC timeout during register, the worker treats
/// the attempt as a dial failure").
pub async fn register(
    transport: &dyn Transport,
    ctx: &ExecutionContext,
    rpc_timeout: Duration,
    request: RegisterRequest,
) -> Result<RegisterReply, CoreError> {
    let call_ctx = ctx.with_timeout(rpc_timeout);
    match call_ctx.run(transport.register(&call_ctx, request)).await {
        Some(Ok(reply)) => Ok(reply),
        Some(Err(err)) => Err(err.into()),
        None => Err(CoreError::new(
            "transport.register_timeout",
            ErrorKind::TransportTransient,
            format!("register RPC did not complete within {rpc_timeout:?}"),
        )),
    }
}

/// Forwards a pushed, already-decoded `RuleSet` to the Orchestrator
/// (`spec.md` §4.F, §4.L). Decoding the wire frame is the concrete
/// transport implementation's job — `spec.md` §6 leaves the exact byte
/// layout of RPC messages implementation-defined.
pub fn apply_config_update(orchestrator: &Orchestrator, candidate: RuleSet) -> Result<(), CoreError> {
    orchestrator.install(candidate)
}

/// Begins the transport's graceful close, where the concrete
/// implementation sends `unregister()` on the wire before tearing down
/// (`spec.md` §4.L, §4.H `draining`).
pub async fn unregister(transport: &dyn Transport, ctx: &ExecutionContext, grace_period: Duration) {
    transport.close(ctx, CloseReason::LocalShutdown, grace_period).await;
}
