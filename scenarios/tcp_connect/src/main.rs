use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::Context;
use swarm_runner::prelude::*;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

fn setup(ctx: &mut RunnerContext) -> HookResult {
    let target = ctx
        .variables()
        .get("target")
        .and_then(|v| v.as_str())
        .context("The test definition must set a `target` variable, for example `127.0.0.1:8080`")?
        .to_string();

    let addr = ctx
        .executor()
        .execute_with_timeout(RESOLVE_TIMEOUT, resolve(&target))?;
    log::info!("Connecting to {target} at {addr}");

    // Resolve once so that virtual users don't measure DNS lookups.
    ctx.variables_mut()
        .insert("resolved_target".to_string(), addr.to_string().into());

    Ok(())
}

fn vu_behaviour(ctx: &mut VuContext) -> HookResult {
    let addr: SocketAddr = ctx
        .var_str("resolved_target")
        .context("Missing resolved target")?
        .parse()?;
    let timeout = Duration::from_millis(
        ctx.var("connect_timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
    );

    let operation = OperationRecord::new("tcp_connect");
    let result = TcpStream::connect_timeout(&addr, timeout);
    ctx.add_operation(&operation.finish(&result));

    let stream = result.with_context(|| format!("Failed to connect to {addr}"))?;
    if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
        log::debug!("Failed to close connection to {addr}: {e}");
    }

    Ok(())
}

async fn resolve(target: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("Could not resolve {target}"))?
        .next()
        .with_context(|| format!("No addresses found for {target}"))
}

fn main() -> SwarmResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .use_setup(setup)
        .use_vu_behaviour(vu_behaviour);

    let exit_code = run(builder)?;

    std::process::exit(exit_code)
}
