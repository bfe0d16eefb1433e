//! Session plus navigation, as the screen sees them.

#![allow(missing_docs)]

use tracing::debug;

use crate::error::{ClientError, Result};
use crate::model::{PermissionSet, Role, Timestamp, User};
use crate::navigation::{
    admin_controls_visible, compute_visibility, data_panel_enabled, export_enabled, NavigationState,
    NavigationView, TabCatalog, TabId, Visibility,
};
use crate::session::{RestoreOutcome, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub username: String,
    pub role: Role,
    pub valid_until: Option<Timestamp>,
}

/// Everything the rendering layer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DashboardView {
    pub signed_in: Option<SignedIn>,
    pub notice: Option<String>,
    pub navigation: NavigationView,
    pub export_enabled: bool,
    pub admin_controls: bool,
    /// Data summary and job progress are loaded.
    pub data_panel: bool,
}

impl DashboardView {
    #[must_use]
    pub fn active_tab(&self) -> Option<&TabId> {
        self.navigation.active().map(|entry| &entry.id)
    }
}

/// Owns the session and the active tab and keeps them consistent.
#[derive(Debug)]
pub struct Dashboard {
    session: SessionManager,
    catalog: TabCatalog,
    priority: Vec<TabId>,
    navigation: NavigationState,
}

impl Dashboard {
    /// A dashboard over the built-in tab catalog.
    pub fn new(session: SessionManager) -> Self {
        Self::with_catalog(session, TabCatalog::dashboard(), TabCatalog::dashboard_priority())
    }

    pub fn with_catalog(session: SessionManager, catalog: TabCatalog, priority: Vec<TabId>) -> Self {
        Self {
            session,
            catalog,
            priority,
            navigation: NavigationState::default(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    #[must_use]
    pub fn catalog(&self) -> &TabCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn current_user(&self) -> Option<&User> {
        self.session.current_user()
    }

    /// Restores the server session and lands on the default tab.
    pub async fn boot(&mut self) -> DashboardView {
        let outcome = self.session.restore_session().await;
        debug!(?outcome, "boot");
        if matches!(outcome, RestoreOutcome::Unauthenticated) {
            self.navigation.clear();
        }
        self.reconcile();
        self.view()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<DashboardView> {
        self.session.login(username, password).await?;
        self.navigation.clear();
        self.reconcile();
        Ok(self.view())
    }

    pub async fn logout(&mut self) -> DashboardView {
        self.session.logout().await;
        self.navigation.clear();
        self.view()
    }

    /// Switches tabs. Hidden and unknown tabs are refused.
    pub fn open(&mut self, tab: &str) -> Result<DashboardView> {
        let visibility = self.visibility();
        if self.session.current_user().is_none() {
            return Err(ClientError::Unauthenticated {
                message: "Sign in first.".into(),
            });
        }
        self.navigation.activate(tab, &self.catalog, &visibility)?;
        Ok(self.view())
    }

    /// Applies a live permission change, moving off a tab that became hidden.
    pub fn permissions_changed(&mut self, permissions: PermissionSet) -> DashboardView {
        if self.session.replace_permissions(permissions) {
            self.reconcile();
        }
        self.view()
    }

    /// Ends the session when `err` says it is gone. Returns whether it did.
    pub fn observe_failure(&mut self, err: &ClientError) -> bool {
        if !err.is_session_terminal() {
            return false;
        }
        self.session.invalidate(Some(err.to_string()));
        self.navigation.clear();
        true
    }

    fn visibility(&self) -> Visibility {
        self.session
            .current_user()
            .map(|user| compute_visibility(user, &self.catalog))
            .unwrap_or_default()
    }

    fn reconcile(&mut self) {
        self.navigation
            .reconcile(self.session.current_user(), &self.catalog, &self.priority);
    }

    #[must_use]
    pub fn view(&self) -> DashboardView {
        let visibility = self.visibility();
        let navigation = NavigationView::build(&self.catalog, &visibility, &self.navigation);
        let user = self.session.current_user();
        DashboardView {
            signed_in: user.map(|user| SignedIn {
                username: user.username.clone(),
                role: user.role,
                valid_until: user.valid_until,
            }),
            notice: self.session.notice().map(str::to_string),
            navigation,
            export_enabled: user.is_some_and(export_enabled),
            admin_controls: user.is_some_and(admin_controls_visible),
            data_panel: user.is_some_and(data_panel_enabled),
        }
    }
}
