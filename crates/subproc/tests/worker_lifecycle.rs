use std::time::Duration;

use subproc::{Message, RuntimeConfig, Subprocess, TransportConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

fn uds_base(tmp: &tempfile::TempDir) -> String {
    tmp.path().join("worker").to_string_lossy().into_owned()
}

#[tokio::test]
async fn worker_echoes_over_uds_and_exits_on_broker_disconnect() {
    let tmp = tempfile::tempdir().unwrap();
    let base_path = uds_base(&tmp);
    let socket_path = TransportConfig::uds_path(&base_path, "w1");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let worker = Subprocess::new("w1").with_runtime_config(RuntimeConfig::fast_for_tests());
    worker.register("Echo", |_c: CancellationToken, msg: Message| async move {
        Ok(Some(subproc::reply::success_response_value(
            &msg,
            msg.payload.clone().unwrap_or_default(),
        )))
    });

    let transport = TransportConfig::Uds {
        base_path: base_path.clone(),
        process_id: "w1".into(),
        fallback: None,
    };
    let worker_task = tokio::spawn(async move { worker.run(transport, true).await });

    let (mut broker_stream, _addr) = listener.accept().await.unwrap();
    broker_stream
        .write_all(b"{\"type\":\"request\",\"id\":\"Echo\",\"correlation_id\":\"c-1\",\"payload\":{\"ok\":true}}\n")
        .await
        .unwrap();

    let mut buf = vec![0u8; 1024];
    let n = broker_stream.read(&mut buf).await.unwrap();
    let line = String::from_utf8(buf[..n].to_vec()).unwrap();
    let reply = Message::from_line(line.trim_end()).unwrap();
    assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
    assert_eq!(reply.payload, Some(serde_json::json!({"ok": true})));

    drop(broker_stream);
    let reason = tokio::time::timeout(Duration::from_secs(2), worker_task)
        .await
        .expect("worker should exit promptly after broker disconnect")
        .unwrap()
        .unwrap();
    assert_eq!(reason, subproc::ExitReason::TransportClosed);
}

#[tokio::test]
async fn worker_recovers_from_a_malformed_line_and_keeps_serving() {
    let tmp = tempfile::tempdir().unwrap();
    let base_path = uds_base(&tmp);
    let socket_path = TransportConfig::uds_path(&base_path, "w2");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let worker = Subprocess::new("w2").with_runtime_config(RuntimeConfig::fast_for_tests());
    worker.register("Echo", |_c: CancellationToken, msg: Message| async move {
        Ok(Some(subproc::reply::success_response_value(
            &msg,
            msg.payload.clone().unwrap_or_default(),
        )))
    });

    let transport = TransportConfig::Uds {
        base_path,
        process_id: "w2".into(),
        fallback: None,
    };
    let worker_task = tokio::spawn(async move { worker.run(transport, true).await });

    let (mut broker_stream, _addr) = listener.accept().await.unwrap();
    broker_stream.write_all(b"not json at all\n").await.unwrap();
    broker_stream
        .write_all(b"{\"type\":\"request\",\"id\":\"Echo\",\"correlation_id\":\"c-2\",\"payload\":{\"n\":2}}\n")
        .await
        .unwrap();

    let mut collected = Vec::new();
    let mut buf = [0u8; 512];
    let mut lines = Vec::new();
    while lines.len() < 2 {
        let n = broker_stream.read(&mut buf).await.unwrap();
        collected.extend_from_slice(&buf[..n]);
        lines = String::from_utf8(collected.clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
    }

    let first = Message::from_line(&lines[0]).unwrap();
    assert!(first.error.is_some());
    let second = Message::from_line(&lines[1]).unwrap();
    assert_eq!(second.correlation_id.as_deref(), Some("c-2"));
    assert_eq!(second.payload, Some(serde_json::json!({"n": 2})));

    drop(broker_stream);
    let _ = tokio::time::timeout(Duration::from_secs(2), worker_task).await;
}
