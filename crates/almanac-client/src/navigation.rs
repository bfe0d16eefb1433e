//! Permission-to-visibility resolution and the active tab.
//!
//! Everything here except [`NavigationState`] is a pure function of the
//! user snapshot and the tab catalog.

#![allow(missing_docs)]

use std::borrow::Borrow;
use std::fmt;

use indexmap::IndexSet;
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::model::{codes, PermissionCode, User};

/// Identifiers of the built-in dashboard tabs.
pub mod tabs {
    pub const STOCK_ANALYSIS: &str = "stock-analysis";
    pub const MONTH_FILTER: &str = "month-filter";
    pub const INDUSTRY_ANALYSIS: &str = "industry-analysis";
    pub const SOURCE_COMPARE: &str = "source-compare";
    pub const DATA_MANAGEMENT: &str = "data-management";
    pub const CONFIG: &str = "config";
    pub const USER_MANAGEMENT: &str = "user-management";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(SmolStr);

impl TabId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TabId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq<&str> for TabId {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_str() == *other
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A feature area and the permissions that reveal it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSpec {
    pub id: TabId,
    pub title: SmolStr,
    /// Any one of these grants visibility. Empty means admin-only.
    pub grants: Vec<PermissionCode>,
}

impl TabSpec {
    pub fn new(id: &str, title: &str, grants: &[&str]) -> Self {
        Self {
            id: TabId::new(id),
            title: SmolStr::new(title),
            grants: grants.iter().map(|code| PermissionCode::new(code)).collect(),
        }
    }

    #[must_use]
    pub fn is_admin_only(&self) -> bool {
        self.grants.is_empty()
    }

    fn granted_to(&self, user: &User) -> bool {
        self.grants.iter().any(|code| user.has_permission(code.as_str()))
    }
}

/// Tabs in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabCatalog {
    tabs: Vec<TabSpec>,
    primary: TabId,
}

impl TabCatalog {
    /// `primary` is where admins always land; it must be one of `tabs`.
    pub fn new(tabs: Vec<TabSpec>, primary: &str) -> Result<Self> {
        if !tabs.iter().any(|tab| tab.id == primary) {
            return Err(ClientError::Config(format!(
                "primary tab '{primary}' is not in the catalog"
            )));
        }
        Ok(Self {
            tabs,
            primary: TabId::new(primary),
        })
    }

    /// The analytics dashboard's built-in tabs.
    #[must_use]
    pub fn dashboard() -> Self {
        Self {
            tabs: vec![
                TabSpec::new(
                    tabs::STOCK_ANALYSIS,
                    "Stock analysis",
                    &[codes::STOCK_ANALYSIS_SINGLE, codes::STOCK_ANALYSIS_MULTI],
                ),
                TabSpec::new(tabs::MONTH_FILTER, "Month filter", &[codes::MONTH_FILTER]),
                TabSpec::new(
                    tabs::INDUSTRY_ANALYSIS,
                    "Industry analysis",
                    &[codes::INDUSTRY_STATISTICS, codes::INDUSTRY_TOP_STOCKS],
                ),
                TabSpec::new(tabs::SOURCE_COMPARE, "Source compare", &[codes::SOURCE_COMPARE]),
                TabSpec::new(
                    tabs::DATA_MANAGEMENT,
                    "Data management",
                    &[codes::DATA_MANAGEMENT],
                ),
                TabSpec::new(tabs::CONFIG, "System config", &[]),
                TabSpec::new(tabs::USER_MANAGEMENT, "User management", &[]),
            ],
            primary: TabId::new(tabs::STOCK_ANALYSIS),
        }
    }

    /// Order in which a non-admin's landing tab is chosen.
    #[must_use]
    pub fn dashboard_priority() -> Vec<TabId> {
        [
            tabs::STOCK_ANALYSIS,
            tabs::MONTH_FILTER,
            tabs::INDUSTRY_ANALYSIS,
            tabs::SOURCE_COMPARE,
            tabs::DATA_MANAGEMENT,
        ]
        .into_iter()
        .map(TabId::new)
        .collect()
    }

    #[must_use]
    pub fn primary(&self) -> &TabId {
        &self.primary
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TabSpec> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabSpec> {
        self.tabs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

/// Visible tabs, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility(IndexSet<TabId>);

impl Visibility {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabId> {
        self.0.iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<&TabId> {
        self.0.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Admins see every tab. Everyone else sees the tabs whose grants intersect
/// their permissions.
#[must_use]
pub fn compute_visibility(user: &User, catalog: &TabCatalog) -> Visibility {
    let admin = user.is_admin();
    Visibility(
        catalog
            .iter()
            .filter(|tab| admin || tab.granted_to(user))
            .map(|tab| tab.id.clone())
            .collect(),
    )
}

/// Landing tab for `user`.
///
/// Admins always land on the catalog's primary tab. Everyone else gets the
/// first visible entry of `priority`, then the first visible tab in catalog
/// order, then nothing.
#[must_use]
pub fn resolve_default_tab(user: &User, catalog: &TabCatalog, priority: &[TabId]) -> Option<TabId> {
    if user.is_admin() {
        return Some(catalog.primary().clone());
    }
    let visibility = compute_visibility(user, catalog);
    priority
        .iter()
        .find(|id| visibility.contains(id.as_str()))
        .or_else(|| visibility.first())
        .cloned()
}

/// Whether export controls are enabled anywhere in the dashboard.
#[must_use]
pub fn export_enabled(user: &User) -> bool {
    user.is_granted(codes::EXPORT_EXCEL)
}

/// Whether admin-only controls (data update triggers, user admin) are shown.
#[must_use]
pub fn admin_controls_visible(user: &User) -> bool {
    user.is_admin()
}

/// Whether the data summary and job progress load for this user.
#[must_use]
pub fn data_panel_enabled(user: &User) -> bool {
    user.is_granted(codes::DATA_MANAGEMENT)
}

/// The single active tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    active: Option<TabId>,
}

impl NavigationState {
    #[must_use]
    pub fn active(&self) -> Option<&TabId> {
        self.active.as_ref()
    }

    /// Switches to `id`, replacing whatever was active.
    pub fn activate(&mut self, id: &str, catalog: &TabCatalog, visibility: &Visibility) -> Result<()> {
        let Some(tab) = catalog.get(id) else {
            return Err(ClientError::validation(format!("unknown tab '{id}'")));
        };
        if !visibility.contains(id) {
            return Err(ClientError::PermissionDenied {
                message: format!("You do not have access to {}.", tab.title),
            });
        }
        self.active = Some(tab.id.clone());
        Ok(())
    }

    /// Restores the invariant after the user or their permissions changed.
    ///
    /// An active tab that is no longer visible, or no active tab at all,
    /// moves to the user's default tab. Returns `true` when the active tab
    /// changed.
    pub fn reconcile(&mut self, user: Option<&User>, catalog: &TabCatalog, priority: &[TabId]) -> bool {
        let next = match user {
            None => None,
            Some(user) => {
                let visibility = compute_visibility(user, catalog);
                match &self.active {
                    Some(active) if visibility.contains(active.as_str()) => Some(active.clone()),
                    _ => resolve_default_tab(user, catalog, priority),
                }
            }
        };
        if next == self.active {
            return false;
        }
        debug!(from = ?self.active, to = ?next, "active tab migrated");
        self.active = next;
        true
    }

    pub fn clear(&mut self) {
        self.active = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    pub id: TabId,
    pub title: SmolStr,
    pub visible: bool,
    /// Navigation entry highlighted.
    pub active: bool,
    /// Tab content shown.
    pub displayed: bool,
}

/// One entry per catalog tab; at most one is active and displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationView {
    pub entries: Vec<NavEntry>,
}

impl NavigationView {
    #[must_use]
    pub fn build(catalog: &TabCatalog, visibility: &Visibility, state: &NavigationState) -> Self {
        let entries = catalog
            .iter()
            .map(|tab| {
                let visible = visibility.contains(tab.id.as_str());
                let active = visible && state.active() == Some(&tab.id);
                NavEntry {
                    id: tab.id.clone(),
                    title: tab.title.clone(),
                    visible,
                    active,
                    displayed: active,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn visible(&self) -> impl Iterator<Item = &NavEntry> {
        self.entries.iter().filter(|entry| entry.visible)
    }

    #[must_use]
    pub fn active(&self) -> Option<&NavEntry> {
        self.entries.iter().find(|entry| entry.active)
    }
}

impl fmt::Display for NavigationView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let marker = match (entry.visible, entry.active) {
                (true, true) => '*',
                (true, false) => ' ',
                (false, _) => '-',
            };
            writeln!(f, "{marker} {:<18} {}", entry.id.as_str(), entry.title)?;
        }
        Ok(())
    }
}
