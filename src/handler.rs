use std::panic::{catch_unwind, AssertUnwindSafe};

/// Receives payloads from peers, whichever transport delivered them.
///
/// Called from an I/O loop with no lock held, so it may call back into the
/// client (e.g. [`crate::Client::send_to_peer`]). It should return quickly;
/// while it runs, that loop delivers nothing else.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, peer_id: &str, data: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &[u8]) + Send + Sync + 'static,
{
    fn on_message(&self, peer_id: &str, data: &[u8]) {
        self(peer_id, data)
    }
}

/// Hand `data` to `handler`. A panic inside the handler is logged and
/// swallowed so the calling loop keeps serving other peers.
pub(crate) fn deliver(handler: &dyn MessageHandler, peer_id: &str, data: &[u8]) {
    if let Err(e) = catch_unwind(AssertUnwindSafe(|| handler.on_message(peer_id, data))) {
        let msg = e
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| e.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        log::warn!("message handler failed for {}: {}", peer_id, msg);
    }
}
