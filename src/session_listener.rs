#[cfg(test)] use mockall::automock;

/// This trait decouples the protocol engine from whatever consumes a session's byte stream
///  (shell, exec, console). Notifications are fire-and-forget and are called while the session
///  is locked, so implementations must not block; the consumer picks up data through the
///  [crate::registry::SessionRegistry] afterwards.
#[cfg_attr(test, automock)]
pub trait SessionListener: Send + Sync + 'static {
    fn on_established(&self, session_id: u16, name: Option<String>);

    /// called when data was appended to a session's incoming buffer
    fn on_incoming(&self, session_id: u16, num_bytes: usize);

    /// called once when an established session is killed, by a FIN from the peer, a fatal
    ///  transport error, idle eviction or [crate::registry::SessionRegistry::destroy]
    fn on_closed(&self, session_id: u16);
}

pub struct NoopSessionListener;

impl SessionListener for NoopSessionListener {
    fn on_established(&self, _session_id: u16, _name: Option<String>) {}

    fn on_incoming(&self, _session_id: u16, _num_bytes: usize) {}

    fn on_closed(&self, _session_id: u16) {}
}
