//! Observable session state

use altan_core::UserProfile;

/// Coarse phase of the session, derived from [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Loading,
    Authenticated,
    /// Unauthenticated after a failed operation
    Error,
}

/// Session state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub access_token: Option<String>,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl SessionState {
    /// Loading state for a persisted session that still has to be validated
    pub(crate) fn restoring(user: Option<UserProfile>, access_token: String) -> Self {
        Self {
            user,
            access_token: Some(access_token),
            is_loading: true,
            last_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn phase(&self) -> AuthPhase {
        if self.is_loading {
            AuthPhase::Loading
        } else if self.user.is_some() {
            AuthPhase::Authenticated
        } else if self.last_error.is_some() {
            AuthPhase::Error
        } else {
            AuthPhase::Unauthenticated
        }
    }

    pub(crate) fn begin(&mut self) {
        self.is_loading = true;
        self.last_error = None;
    }

    pub(crate) fn authenticate(&mut self, user: UserProfile, access_token: Option<String>) {
        self.user = Some(user);
        self.access_token = access_token;
        self.is_loading = false;
        self.last_error = None;
    }

    /// Drop the user and token. Keeps a recorded error for display.
    pub(crate) fn clear(&mut self) {
        self.user = None;
        self.access_token = None;
        self.is_loading = false;
    }
}
