use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

use crate::config::Dnscat2Config;
use crate::session::{Session, SessionState};
use crate::session_listener::{NoopSessionListener, SessionListener};

/// Sessions are shared between all dispatch loops that may receive packets for them. Locking a
///  session serializes all handling for it.
pub type SessionHandle = Arc<Mutex<Session>>;

/// The single source of truth for which sessions exist. Dispatchers and application code never
///  create or store sessions themselves.
///
/// The registry also owns the application's [SessionListener]: whoever kills an established
///  session (a FIN, a fatal transport error, the idle sweeper or the application itself) the
///  listener's `on_closed` is called exactly once for it.
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<u16, SessionHandle>>,
    listener: Arc<dyn SessionListener>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::with_listener(Arc::new(NoopSessionListener))
    }
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        Default::default()
    }

    pub fn with_listener(listener: Arc<dyn SessionListener>) -> SessionRegistry {
        SessionRegistry {
            sessions: Default::default(),
            listener,
        }
    }

    pub fn listener(&self) -> &Arc<dyn SessionListener> {
        &self.listener
    }

    /// Destroys the session and notifies the listener if this closed an established session.
    ///  Returns `true` in that case.
    pub fn kill(&self, session: &mut Session) -> bool {
        let closed = session.destroy() == SessionState::Established;
        if closed {
            self.listener.on_closed(session.id());
        }
        closed
    }

    /// Returns the session for `session_id`, creating a new one (in state NEW) if there is none.
    pub async fn find(&self, session_id: u16) -> SessionHandle {
        if let Some(session) = self.sessions.read().await.get(&session_id) {
            return session.clone();
        }

        match self.sessions.write().await.entry(session_id) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                debug!(session_id, "creating new session");
                e.insert(Arc::new(Mutex::new(Session::new(session_id)))).clone()
            }
        }
    }

    pub async fn get(&self, session_id: u16) -> Option<SessionHandle> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Removes the session and discards all its buffers
    pub async fn destroy(&self, session_id: u16) {
        let removed = self.sessions.write().await.remove(&session_id);
        if let Some(session) = removed {
            self.kill(&mut *session.lock().await);
        }
    }

    /// Removes `session` if it is (still) the registered session for its id - a session that was
    ///  replaced by a new one with the same id in the meantime is left alone. Destroys `session`
    ///  in either case.
    ///
    /// NB: `session` must not be locked by the caller
    pub async fn evict(&self, session: &SessionHandle) {
        let mut session_guard = session.lock().await;
        let session_id = session_guard.id();
        self.kill(&mut session_guard);
        drop(session_guard);

        let mut sessions = self.sessions.write().await;
        if let Entry::Occupied(e) = sessions.entry(session_id) {
            if Arc::ptr_eq(e.get(), session) {
                debug!(session_id, "evicting session");
                e.remove();
            }
        }
    }

    pub async fn session_ids(&self) -> Vec<u16> {
        let mut result = self.sessions.read().await.keys().cloned().collect::<Vec<_>>();
        result.sort();
        result
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Appends application data to be sent to the peer. Returns `false` if there is no such
    ///  session.
    pub async fn queue_outgoing(&self, session_id: u16, data: &[u8]) -> bool {
        match self.get(session_id).await {
            Some(session) => {
                session.lock().await.queue_outgoing(data);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the data received for a session so far, or `None` if there is no such
    ///  session.
    pub async fn take_incoming(&self, session_id: u16) -> Option<Bytes> {
        let session = self.get(session_id).await?;
        let data = session.lock().await.take_incoming();
        Some(data)
    }

    /// Destroys all sessions that had no activity for `max_idle`. Sessions that are locked (i.e.
    ///  currently being handled) are not idle by definition and are skipped.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<u16> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        let mut sessions = self.sessions.write().await;
        sessions.retain(|&session_id, session| {
            let Ok(mut session) = session.try_lock() else {
                return true;
            };
            if now.duration_since(session.last_activity()) < max_idle {
                return true;
            }

            info!(session_id, "session idle for more than {:?} - destroying", max_idle);
            self.kill(&mut session);
            evicted.push(session_id);
            false
        });

        evicted
    }

    /// Spawns a task that periodically evicts idle sessions, or returns `None` if the config does
    ///  not define an idle timeout
    pub fn spawn_idle_sweeper(self: &Arc<Self>, config: &Dnscat2Config) -> anyhow::Result<Option<JoinHandle<()>>> {
        config.validate()?;

        let Some(idle_timeout) = config.idle_timeout else {
            return Ok(None);
        };
        let sweep_interval = config.idle_sweep_interval;
        let registry = self.clone();

        info!("evicting sessions after {:?} of inactivity", idle_timeout);
        Ok(Some(tokio::spawn(async move {
            let mut ticks = interval(sweep_interval);
            loop {
                ticks.tick().await;
                let evicted = registry.evict_idle(idle_timeout).await;
                if !evicted.is_empty() {
                    debug!("idle sweep evicted {} sessions", evicted.len());
                }
            }
        })))
    }
}
