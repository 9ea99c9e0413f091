//! Process-wide transport sessions shared across connector instances.
//!
//! Relay-style backends keep one expensive handshake alive for the whole
//! process. Each entry carries its own phase (`None → Initializing → Ready`);
//! `Initializing` doubles as the "is enabling" latch and is only ever held by
//! an [`EnableGuard`], so a failed or panicking activation cannot wedge it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use crate::domain::ProviderKind;
use crate::ports::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    None,
    Initializing,
    Ready,
}

#[derive(Default)]
struct SessionEntry {
    enabling: bool,
    session: Option<Arc<dyn Any + Send + Sync>>,
}

impl SessionEntry {
    fn phase(&self) -> SessionPhase {
        if self.enabling {
            SessionPhase::Initializing
        } else if self.session.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::None
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<ProviderKind, SessionEntry>>,
}

static GLOBAL: LazyLock<Arc<SessionRegistry>> = LazyLock::new(|| Arc::new(SessionRegistry::default()));

impl SessionRegistry {
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    pub fn phase(&self, kind: ProviderKind) -> SessionPhase {
        match self.entries.lock() {
            Ok(g) => g.get(&kind).map(SessionEntry::phase).unwrap_or(SessionPhase::None),
            Err(poisoned) => poisoned
                .into_inner()
                .get(&kind)
                .map(SessionEntry::phase)
                .unwrap_or(SessionPhase::None),
        }
    }

    /// Sets the enabling latch for `kind`. Fails if another activation holds it.
    pub fn begin_enable(self: &Arc<Self>, kind: ProviderKind) -> Result<EnableGuard, ConnectError> {
        let mut g = self
            .entries
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("session registry", e))?;
        let entry = g.entry(kind).or_default();
        if entry.enabling {
            return Err(ConnectError::ActivationInProgress(format!(
                "{kind} is already being enabled"
            )));
        }
        entry.enabling = true;
        Ok(EnableGuard {
            registry: Arc::clone(self),
            kind,
        })
    }

    pub fn get<T: Any + Send + Sync>(&self, kind: ProviderKind) -> Option<Arc<T>> {
        let g = self.entries.lock().ok()?;
        let session = g.get(&kind)?.session.clone()?;
        session.downcast::<T>().ok()
    }

    pub fn store<T: Any + Send + Sync>(&self, kind: ProviderKind, session: Arc<T>) -> Result<(), ConnectError> {
        let mut g = self
            .entries
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("session registry", e))?;
        g.entry(kind).or_default().session = Some(session);
        Ok(())
    }

    /// Drops the shared session for `kind`, returning it if it was of type `T`.
    pub fn take<T: Any + Send + Sync>(&self, kind: ProviderKind) -> Option<Arc<T>> {
        let mut g = self.entries.lock().ok()?;
        let session = g.get_mut(&kind)?.session.take()?;
        session.downcast::<T>().ok()
    }

    fn release(&self, kind: ProviderKind) {
        let mut g = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = g.get_mut(&kind) {
            entry.enabling = false;
        }
    }
}

/// Holds the enabling latch for one kind; releases it on drop.
#[must_use = "the latch is released as soon as the guard is dropped"]
pub struct EnableGuard {
    registry: Arc<SessionRegistry>,
    kind: ProviderKind,
}

impl Drop for EnableGuard {
    fn drop(&mut self) {
        self.registry.release(self.kind);
    }
}
