//! End-to-end bridge round trip on the in-memory broker.
//!
//! Spawns a VM agent node and a gateway node in one process, then issues
//! `vm-stopService` from the gateway and prints the agent's echo. Run
//! with `RUST_LOG=debug` to watch the envelopes move.

use std::time::Duration;

use warren::prelude::*;
use warren::testing::{StubControl, TestNet};
use warren::vm::VM_STOP_SERVICE;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let net = TestNet::new();
    let control = StubControl::new();
    let agent = net.vm_agent("v1", control.clone()).await?;
    let gateway = net.gateway().await?;
    tracing::info!(agent = %agent.bridge.identity(), "vm agent is consuming");

    let echo: ServiceEcho = gateway
        .bridge
        .call(
            &Target::vm_agent("v1"),
            VM_STOP_SERVICE,
            &ServiceCommandParams {
                vm_id: "v1".into(),
                service_id: "svc1".into(),
            },
            Duration::from_secs(5),
        )
        .await?;

    println!("{}", echo.echo);
    assert_eq!(control.stopped.lock().as_slice(), ["svc1".to_string()]);

    // A second call against a stopped docker daemon rejects cleanly.
    control.set_failure("docker daemon unreachable");
    let err = gateway
        .bridge
        .call_raw(
            &Target::vm_agent("v1"),
            VM_STOP_SERVICE,
            serde_json::json!({"vmId": "v1", "serviceId": "svc1"}),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    println!("expected failure: {err}");

    gateway.bridge.shutdown();
    agent.bridge.shutdown();
    Ok(())
}
