//! Expected outcomes of authentication flows.

/// Result of an auth-related supervisor operation.
///
/// Second-factor prompts and expired credentials are ordinary outcomes,
/// not errors; only unexpected failures travel as [`crate::AppError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome<T> {
    /// The operation completed.
    Success(T),
    /// The account has a second factor and no password was supplied.
    NeedsSecondFactor,
    /// The saved credential is no longer authorized.
    SessionExpired,
    /// The operation was refused for the given reason.
    Failed(String),
}

/// Result of signing in with a login code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInStep {
    /// Sign-in completed.
    Complete,
    /// The account requires its password before sign-in completes.
    PasswordRequired,
}

/// Terminal state of a reconnection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Transport restored and authorization confirmed.
    Reconnected,
    /// The network reported the credential as unauthorized.
    SessionExpired,
    /// Every attempt failed.
    Exhausted,
    /// The session was removed or replaced while reconnecting.
    Superseded,
}
