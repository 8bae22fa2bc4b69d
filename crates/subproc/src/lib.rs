//! Line-delimited JSON message framework for broker/worker subprocesses.
//!
//! A worker adopts a transport (an inherited file-descriptor pair, or a Unix
//! domain socket dialed back to the broker), registers handlers under
//! request ids or message types, and hands both to [`Subprocess::run`]. The
//! runtime reads `\n`-delimited [`Message`] frames, dispatches each to its
//! handler on its own task, and writes replies back through a batching
//! writer that coalesces small frames and flushes large ones directly.
//!
//! [`reply`] and [`validate`] are optional helpers for handler authors;
//! nothing in the dispatch path depends on them.

mod config;
mod dispatch;
mod error;
mod logging;
mod message;
mod registry;
pub mod reply;
mod subprocess;
mod transport;
pub mod validate;
mod writer;

pub use config::{RuntimeConfig, DEFAULT_LOGS_DIR, DEFAULT_UDS_BASE_PATH};
pub use error::SubprocError;
pub use logging::init as init_logging;
pub use message::{Message, MessageType, MAX_MESSAGE_BYTES};
pub use registry::{Handler, HandlerError, HandlerRegistry, HandlerResult};
pub use subprocess::{ExitReason, Subprocess, SubprocessHandle};
pub use transport::TransportConfig;
