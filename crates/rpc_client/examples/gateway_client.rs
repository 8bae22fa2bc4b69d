//! A caller that dials a worker's UDS transport and makes an RPC call. Pairs
//! with `subproc`'s `echo_worker` example if you swap the request id to
//! `Echo` and point both at the same socket base path.
use std::time::Duration;

use rpc_client::RpcClient;
use subproc::{RuntimeConfig, Subprocess, TransportConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subprocess = Subprocess::new("gateway").with_runtime_config(RuntimeConfig::default());
    let transport = TransportConfig::Uds {
        base_path: subproc::DEFAULT_UDS_BASE_PATH.to_string(),
        process_id: "gateway".into(),
        fallback: None,
    };

    let (handle, run_task) = subprocess.spawn(transport, true).await?;
    let rpc = RpcClient::attach(
        &subprocess,
        "gateway",
        handle,
        run_task,
        Duration::from_secs(5),
        Duration::from_millis(100),
    );

    let reply = rpc
        .invoke(
            "RPCGetCVE",
            Some(serde_json::json!({"cve_id": "CVE-2024-0001"})),
            "cve-worker",
            &CancellationToken::new(),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&reply.payload)?);

    rpc.run().await;
    Ok(())
}
