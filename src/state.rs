//! Application state: the generation backend client and the open authoring
//! sessions.
//!
//! Sessions are kept in memory, keyed by id. Each one belongs to the identity
//! that opened it; lookups by anybody else behave as if it did not exist.
//! Drafts nobody has looked up for `server.session_idle_secs` are swept,
//! unless a call is still running for them.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::backend::{GenerationBackend, HttpBackend};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::protocol::CreateSessionIn;
use crate::session::{Identity, Session, SessionHandle};

pub struct AppState {
    pub sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    pub backend: Arc<dyn GenerationBackend>,
    pub config: ServiceConfig,
}

impl AppState {
    /// Build state from config with the HTTP backend client.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend)?;
        info!(
            target: "qforge_backend",
            base_url = %backend.base_url,
            authenticated = backend.api_key.is_some(),
            "Generation backend configured"
        );
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    pub fn with_backend(config: ServiceConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), backend, config }
    }

    /// Open a fresh draft, or re-open a persisted one.
    #[instrument(level = "info", skip(self, body), fields(user = %identity.user_id))]
    pub async fn open_session(&self, identity: Identity, body: CreateSessionIn) -> Result<SessionHandle> {
        let session = match body.state {
            Some(blob) => Session::hydrate(identity, blob, body.question_id)?,
            None => {
                let mut s = Session::new(identity);
                s.question_id = body.question_id;
                s
            }
        };
        let id = session.id;
        let hydrated = session.question_id.is_some();
        let handle = session.into_handle();
        self.sessions.write().await.insert(id, handle.clone());
        info!(target: "qforge_backend", session = %id, hydrated, "Session opened");
        Ok(handle)
    }

    /// Session `id` if it exists and belongs to `identity`.
    pub async fn session(&self, id: Uuid, identity: &Identity) -> Result<SessionHandle> {
        let handle = { self.sessions.read().await.get(&id).cloned() }.ok_or(Error::UnknownSession)?;
        {
            let mut s = handle.lock().await;
            if s.identity.user_id != identity.user_id {
                return Err(Error::UnknownSession);
            }
            s.touched = Instant::now();
        }
        Ok(handle)
    }

    /// Drop drafts idle for longer than the configured limit as of `now`.
    /// Busy or currently locked sessions are kept. Returns how many went.
    pub async fn sweep_idle(&self, now: Instant) -> usize {
        let Some(max_idle) = self.config.server.session_idle() else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(s) => s.is_busy() || now.saturating_duration_since(s.touched) < max_idle,
            Err(_) => true,
        });
        let swept = before - sessions.len();
        if swept > 0 {
            info!(target: "qforge_backend", swept, remaining = sessions.len(), "Idle sessions swept");
        }
        swept
    }

    #[instrument(level = "info", skip(self), fields(user = %identity.user_id))]
    pub async fn discard_session(&self, id: Uuid, identity: &Identity) -> Result<()> {
        self.session(id, identity).await?;
        self.sessions.write().await.remove(&id);
        info!(target: "qforge_backend", session = %id, "Session discarded");
        Ok(())
    }
}
