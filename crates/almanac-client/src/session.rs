//! Authentication lifecycle and the signed-in identity.

#![allow(missing_docs)]

use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{info, warn};

use crate::api::SessionApi;
use crate::error::{ClientError, Result};
use crate::model::{PermissionSet, User};

/// Message fragments of a login failure that means the account has expired.
const EXPIRY_KEYWORDS: &[&str] = &["过期", "expired"];

/// Where the signed-in identity stands.
///
/// There is no resting "expired" state: expiry found during restore or login
/// routes straight back to `Unauthenticated` with a notice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(User),
}

/// Result of [`SessionManager::restore_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Authenticated,
    Unauthenticated,
}

/// Owns the current user. Every permission check reads it from here.
pub struct SessionManager {
    api: Arc<dyn SessionApi>,
    state: SessionState,
    notice: Option<String>,
    support_contact: SmolStr,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("notice", &self.notice)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(api: Arc<dyn SessionApi>, support_contact: impl Into<SmolStr>) -> Self {
        Self {
            api,
            state: SessionState::Unauthenticated,
            notice: None,
            support_contact: support_contact.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn current_user(&self) -> Option<&User> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user),
            SessionState::Unauthenticated => None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// Pending message for the sign-in screen, if any.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Fixed text shown when an account's validity window has passed.
    #[must_use]
    pub fn expired_notice(&self) -> String {
        format!(
            "Your account has expired. Contact {} to renew access.",
            self.support_contact
        )
    }

    /// Asks the server who the ambient credentials belong to.
    ///
    /// Fails closed: anything short of a non-expired identity leaves the
    /// session unauthenticated.
    pub async fn restore_session(&mut self) -> RestoreOutcome {
        match self.api.current_user().await {
            Ok(user) if user.expired => {
                let notice = user
                    .expired_message
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| self.expired_notice());
                info!(username = %user.username, "restored session belongs to an expired account");
                self.state = SessionState::Unauthenticated;
                self.notice = Some(notice);
                RestoreOutcome::Unauthenticated
            }
            Ok(user) => {
                info!(username = %user.username, role = %user.role, "session restored");
                self.state = SessionState::Authenticated(user);
                self.notice = None;
                RestoreOutcome::Authenticated
            }
            Err(err) => {
                if err.is_transport() || matches!(err, ClientError::Decode(_)) {
                    warn!(error = %err, "session restore failed, continuing signed out");
                } else {
                    info!(error = %err, "no active session");
                }
                self.state = SessionState::Unauthenticated;
                RestoreOutcome::Unauthenticated
            }
        }
    }

    /// Signs in. A failed attempt leaves the current state untouched.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::validation("Enter both username and password."));
        }
        let user = match self.api.login(username, password).await {
            Ok(user) if user.expired => {
                return Err(ClientError::AccountExpired {
                    message: user
                        .expired_message
                        .filter(|text| !text.trim().is_empty())
                        .unwrap_or_else(|| self.expired_notice()),
                });
            }
            Ok(user) => user,
            Err(err) => return Err(self.rewrite_login_failure(err)),
        };
        info!(username = %user.username, role = %user.role, "signed in");
        self.notice = None;
        self.state = SessionState::Authenticated(user.clone());
        Ok(user)
    }

    /// A login answer is never about the current session: expiry is
    /// recognised by its message whatever status carried it, and a 401 means
    /// bad credentials.
    fn rewrite_login_failure(&self, err: ClientError) -> ClientError {
        match err {
            ClientError::AccountExpired { .. } => ClientError::AccountExpired {
                message: self.expired_notice(),
            },
            ClientError::PermissionDenied { message }
            | ClientError::Unauthenticated { message }
            | ClientError::Rejected { message, .. }
                if mentions_expiry(&message) =>
            {
                ClientError::AccountExpired {
                    message: self.expired_notice(),
                }
            }
            ClientError::Unauthenticated { message } => ClientError::Rejected {
                code: None,
                message,
            },
            other => other,
        }
    }

    /// Signs out. Never fails: the local session ends even when the server
    /// cannot be reached.
    pub async fn logout(&mut self) {
        if let Err(err) = self.api.logout().await {
            warn!(error = %err, "logout request failed, clearing session locally");
        }
        if let Some(user) = self.current_user() {
            info!(username = %user.username, "signed out");
        }
        self.state = SessionState::Unauthenticated;
        self.notice = None;
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<String> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(ClientError::validation(
                "Enter both the current and the new password.",
            ));
        }
        if !self.is_authenticated() {
            return Err(ClientError::Unauthenticated {
                message: "Sign in first.".into(),
            });
        }
        self.api.change_password(old_password, new_password).await
    }

    /// Ends the session after another operation found it terminated or expired.
    pub fn invalidate(&mut self, notice: Option<String>) {
        if let Some(user) = self.current_user() {
            info!(username = %user.username, "session invalidated by server");
        }
        self.state = SessionState::Unauthenticated;
        self.notice = notice;
    }

    /// Applies a live permission change to the signed-in user.
    ///
    /// Returns `false` when nobody is signed in.
    pub fn replace_permissions(&mut self, permissions: PermissionSet) -> bool {
        match &mut self.state {
            SessionState::Authenticated(user) => {
                user.permissions = permissions;
                true
            }
            SessionState::Unauthenticated => false,
        }
    }
}

fn mentions_expiry(message: &str) -> bool {
    let lowered = message.to_lowercase();
    EXPIRY_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}
