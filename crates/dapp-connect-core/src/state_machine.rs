use std::sync::Mutex;

use crate::domain::ProviderKind;
use crate::ports::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Activating,
    Active,
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorAction {
    Activate,
    ActivationSucceeded,
    ActivationFailed,
    Deactivate,
}

pub fn connector_transition(
    from: ConnectorState,
    action: ConnectorAction,
) -> Result<(ConnectorState, &'static str), ConnectError> {
    use ConnectorAction as A;
    use ConnectorState as S;

    let next = match (from, action) {
        (S::Idle, A::Activate) => (S::Activating, "activation_started"),
        (S::Activating, A::ActivationSucceeded) => (S::Active, "activation_succeeded"),
        (S::Activating, A::ActivationFailed) => (S::Idle, "activation_failed"),
        (S::Idle | S::Activating | S::Active, A::Deactivate) => (S::Deactivated, "deactivated"),
        (S::Deactivated, A::Deactivate) => (S::Deactivated, "already_deactivated"),
        _ => {
            return Err(ConnectError::InvalidState(format!(
                "illegal connector transition: {from:?} --{action:?}-->"
            )))
        }
    };
    Ok(next)
}

/// Per-connector lifecycle cell.
#[derive(Debug)]
pub struct Lifecycle {
    kind: ProviderKind,
    state: Mutex<ConnectorState>,
}

impl Lifecycle {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            state: Mutex::new(ConnectorState::Idle),
        }
    }

    pub fn state(&self) -> ConnectorState {
        match self.state.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn apply(&self, action: ConnectorAction) -> Result<ConnectorState, ConnectError> {
        let mut g = self
            .state
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("connector lifecycle", e))?;
        let (next, reason) = connector_transition(*g, action)?;
        tracing::debug!(kind = %self.kind, from = ?*g, to = ?next, reason, "connector transition");
        *g = next;
        Ok(next)
    }

    /// Moves to `Activating`, runs the activation and settles the outcome.
    pub async fn activate<T, F>(&self, activation: F) -> Result<T, ConnectError>
    where
        F: std::future::Future<Output = Result<T, ConnectError>>,
    {
        self.apply(ConnectorAction::Activate)?;
        match activation.await {
            Ok(value) => {
                self.apply(ConnectorAction::ActivationSucceeded)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.apply(ConnectorAction::ActivationFailed);
                Err(e)
            }
        }
    }

    pub fn deactivate(&self) {
        let _ = self.apply(ConnectorAction::Deactivate);
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectorState::Active
    }

    pub fn ensure_active(&self) -> Result<(), ConnectError> {
        match self.state() {
            ConnectorState::Active => Ok(()),
            other => Err(ConnectError::NotConnected(format!(
                "{} connector is {other:?}",
                self.kind
            ))),
        }
    }
}
