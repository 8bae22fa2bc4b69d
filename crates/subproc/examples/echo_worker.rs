//! A minimal worker that echoes whatever payload it's sent back to the
//! caller. Run it with an input/output fd pair already attached (fd 3/4),
//! e.g. from a broker that forks with those descriptors wired up:
//!
//! ```text
//! cargo run --example echo_worker
//! ```
use subproc::{reply, ExitReason, Message, Subprocess, TransportConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = subproc::init_logging(std::path::Path::new(subproc::DEFAULT_LOGS_DIR), "echo-worker")?;

    let worker = Subprocess::new("echo-worker");
    worker.register("Echo", |_cancel: CancellationToken, msg: Message| async move {
        Ok(Some(reply::success_response_value(
            &msg,
            msg.payload.clone().unwrap_or_default(),
        )))
    });

    let transport = TransportConfig::FdPair {
        input_fd: 3,
        output_fd: 4,
    };

    let reason = worker.run(transport, true).await?;
    std::process::exit(match reason {
        ExitReason::TransportClosed | ExitReason::Signaled => reason.exit_code(),
    });
}
