use std::time::Duration;

use rpc_client::{RpcClient, RpcError};
use subproc::{ExitReason, Message, RuntimeConfig, Subprocess, TransportConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

fn uds_base(tmp: &tempfile::TempDir) -> String {
    tmp.path().join("rpc").to_string_lossy().into_owned()
}

#[tokio::test]
async fn gateway_invokes_a_worker_request_and_gets_the_reply() {
    let tmp = tempfile::tempdir().unwrap();
    let base_path = uds_base(&tmp);
    let socket_path = TransportConfig::uds_path(&base_path, "gateway");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let subprocess =
        Subprocess::new("gateway").with_runtime_config(RuntimeConfig::fast_for_tests());
    let transport = TransportConfig::Uds {
        base_path,
        process_id: "gateway".into(),
        fallback: None,
    };
    let (handle, run_task) = subprocess.spawn(transport, true).await.unwrap();
    let rpc = RpcClient::attach(
        &subprocess,
        "gateway",
        handle,
        run_task,
        Duration::from_secs(2),
        Duration::from_millis(50),
    );

    // Stand in for a broker/worker: accept the connection and answer
    // whatever request comes in with a canned response.
    let (mut worker, _addr) = listener.accept().await.unwrap();
    let worker_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let n = worker.read(&mut buf).await.unwrap();
        let request =
            Message::from_line(std::str::from_utf8(&buf[..n]).unwrap().trim_end()).unwrap();
        assert_eq!(request.id, "RPCGetCVE");
        assert_eq!(request.target.as_deref(), Some("cve-worker"));

        let reply = subproc::reply::success_response_value(
            &request,
            serde_json::json!({"summary": "heap overflow"}),
        );
        worker.write_all(reply.to_line().unwrap().as_bytes()).await.unwrap();
        worker
    });

    let reply = rpc
        .invoke(
            "RPCGetCVE",
            Some(serde_json::json!({"cve_id": "CVE-2024-0001"})),
            "cve-worker",
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        reply.payload,
        Some(serde_json::json!({"summary": "heap overflow"}))
    );

    let worker = worker_task.await.unwrap();
    drop(worker);
    let reason = tokio::time::timeout(Duration::from_secs(2), rpc.run())
        .await
        .expect("rpc.run() did not complete after the worker disconnected");
    assert_eq!(reason, ExitReason::TransportClosed);
}

#[tokio::test]
async fn gateway_surfaces_a_remote_error_response() {
    let tmp = tempfile::tempdir().unwrap();
    let base_path = uds_base(&tmp);
    let socket_path = TransportConfig::uds_path(&base_path, "gateway-err");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let subprocess =
        Subprocess::new("gateway-err").with_runtime_config(RuntimeConfig::fast_for_tests());
    let transport = TransportConfig::Uds {
        base_path,
        process_id: "gateway-err".into(),
        fallback: None,
    };
    let (handle, run_task) = subprocess.spawn(transport, true).await.unwrap();
    let rpc = RpcClient::attach(
        &subprocess,
        "gateway-err",
        handle,
        run_task,
        Duration::from_secs(2),
        Duration::from_millis(50),
    );

    let (mut worker, _addr) = listener.accept().await.unwrap();
    let worker_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let n = worker.read(&mut buf).await.unwrap();
        let request =
            Message::from_line(std::str::from_utf8(&buf[..n]).unwrap().trim_end()).unwrap();
        let reply = subproc::reply::error_response(&request, "no such cve_id");
        worker.write_all(reply.to_line().unwrap().as_bytes()).await.unwrap();
        worker
    });

    let err = rpc
        .invoke(
            "RPCGetCVE",
            Some(serde_json::json!({"cve_id": "CVE-0000-0000"})),
            "cve-worker",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(text) if text == "no such cve_id"));

    let worker = worker_task.await.unwrap();
    drop(worker);
    let reason = tokio::time::timeout(Duration::from_secs(2), rpc.run())
        .await
        .expect("rpc.run() did not complete after the worker disconnected");
    assert_eq!(reason, ExitReason::TransportClosed);
}
