/// Lifecycle of a session held by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// A valid access token is in hand.
    #[default]
    Active,
    /// The access token failed local verification; a refresh is due.
    Stale,
    /// A refresh exchange is in flight.
    Refreshing,
    /// Theft was detected or the session was revoked explicitly.
    Revoked,
    /// The core rejected the refresh; the user must sign in again.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LocalVerificationFailed,
    RefreshStarted,
    Rotated,
    TheftDetected,
    RefreshRejected,
    /// The refresh could not complete for a reason unrelated to the token (core unreachable).
    RefreshAborted,
    Revoked,
}

impl SessionState {
    /// Next state after `event`. Terminal states ignore everything.
    #[must_use]
    pub fn on(self, event: SessionEvent) -> Self {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Revoked | S::Failed, _) => self,
            (_, E::Revoked) => S::Revoked,
            (S::Active, E::LocalVerificationFailed) => S::Stale,
            (S::Active | S::Stale, E::RefreshStarted) => S::Refreshing,
            (S::Refreshing, E::Rotated) => S::Active,
            (S::Refreshing, E::TheftDetected) => S::Revoked,
            (S::Refreshing, E::RefreshRejected) => S::Failed,
            (S::Refreshing, E::RefreshAborted) => S::Stale,
            _ => self,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Revoked | Self::Failed)
    }
}
