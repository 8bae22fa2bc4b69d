use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use subproc::Message;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Correlation-id keyed table of in-flight RPC calls. Each entry is a
/// single-slot oneshot; removing an entry from the map and signaling its
/// sender happen as one step (`take`), so a response racing a timeout or a
/// cancellation can never double-deliver or leak the slot.
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `correlation_id` and returns the receiver half. Must be
    /// called before the request is sent, so a response can never race
    /// ahead of its own registration.
    pub(crate) fn register(&self, correlation_id: String) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().expect("pending table poisoned").insert(correlation_id, tx);
        rx
    }

    /// Removes and returns the sender for `correlation_id`, if still
    /// pending. This is the only way an entry leaves the table, so taking
    /// it is what "resolves" a call, whether by delivery, timeout, or
    /// cancellation.
    fn take(&self, correlation_id: &str) -> Option<oneshot::Sender<Message>> {
        self.entries
            .lock()
            .expect("pending table poisoned")
            .remove(correlation_id)
    }

    /// Delivers `msg` to its waiter. Retries the lookup for up to
    /// `handoff_timeout` in case this response raced ahead of the
    /// in-flight call registering its slot; gives up and drops the message
    /// on the floor if no waiter ever shows up. Returns whether delivery
    /// succeeded, for tests asserting at-most-once delivery.
    pub(crate) async fn deliver(&self, msg: Message, handoff_timeout: Duration) -> bool {
        let Some(correlation_id) = msg.correlation_id.clone() else {
            warn!(id = %msg.id, "dropping response with no correlation id");
            return false;
        };

        let deadline = Instant::now() + handoff_timeout;
        loop {
            if let Some(tx) = self.take(&correlation_id) {
                return tx.send(msg).is_ok();
            }
            if Instant::now() >= deadline {
                warn!(%correlation_id, "no waiter for response within handoff window, dropping");
                return false;
            }
            sleep(Duration::from_millis(1)).await;
        }
    }

    /// Removes `correlation_id`'s entry without delivering anything,
    /// dropping the oneshot sender so the waiter observes a closed channel.
    /// Called on timeout or cancellation.
    pub(crate) fn abandon(&self, correlation_id: &str) {
        self.take(correlation_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("pending table poisoned").len()
    }
}
