//! Dashboard data model shared by the controller and the transport.

#![allow(missing_docs)]

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

/// Permission codes from the server catalog that the controller acts on.
pub mod codes {
    pub const STOCK_ANALYSIS_SINGLE: &str = "stock_analysis_single";
    pub const STOCK_ANALYSIS_MULTI: &str = "stock_analysis_multi";
    pub const MONTH_FILTER: &str = "month_filter";
    pub const INDUSTRY_STATISTICS: &str = "industry_statistics";
    pub const INDUSTRY_TOP_STOCKS: &str = "industry_top_stocks";
    pub const SOURCE_COMPARE: &str = "source_compare";
    pub const EXPORT_EXCEL: &str = "export_excel";
    pub const DATA_MANAGEMENT: &str = "data_management";
}

/// Opaque permission identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(SmolStr);

impl PermissionCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(code.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Borrow<str> for PermissionCode {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for PermissionCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PermissionSet = BTreeSet<PermissionCode>;

/// Builds a permission set from string codes.
pub fn permission_set<I, S>(codes: I) -> PermissionSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    codes.into_iter().map(PermissionCode::new).collect()
}

/// Catalog entry for a permission. Presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub code: PermissionCode,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "user", alias = "standard")]
    Standard,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Standard => "user",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "user" | "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const COMPACT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]");

/// Server timestamp in the compact `YYYYMMDDHHMMSS` form (server local time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(PrimitiveDateTime);

impl Timestamp {
    #[must_use]
    pub fn new(value: PrimitiveDateTime) -> Self {
        Self(value)
    }

    pub fn parse_compact(text: &str) -> Result<Self, time::error::Parse> {
        PrimitiveDateTime::parse(text.trim(), COMPACT_FORMAT).map(Self)
    }

    #[must_use]
    pub fn to_compact(self) -> String {
        self.0
            .format(COMPACT_FORMAT)
            .unwrap_or_else(|_| String::new())
    }

    #[must_use]
    pub fn datetime(self) -> PrimitiveDateTime {
        self.0
    }
}

impl TryFrom<String> for Timestamp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_compact(&value).map_err(|err| format!("invalid timestamp '{value}': {err}"))
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.to_compact()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = self.0;
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        )
    }
}

fn nullable_set<'de, D>(deserializer: D) -> Result<PermissionSet, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<PermissionSet>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_true() -> bool {
    true
}

/// The signed-in identity as returned by login and session lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default, deserialize_with = "nullable_set")]
    pub permissions: PermissionSet,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub expired_message: Option<String>,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Raw membership test, without the admin override.
    #[must_use]
    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.contains(code)
    }

    /// Admins hold every permission; everyone else needs the code.
    #[must_use]
    pub fn is_granted(&self, code: &str) -> bool {
        self.is_admin() || self.has_permission(code)
    }
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub valid_until: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserUpdate {
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub valid_until: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub session_duration_hours: u32,
}

/// Progress snapshot of a long-running server job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_running: bool,
}

impl JobProgress {
    /// Completion percentage in `0.0..=100.0`; zero while the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Answer to a job start request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobStart {
    pub already_running: bool,
    pub message: Option<String>,
}

/// Scope of a data update job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Full,
    Incremental,
}

impl UpdateKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "full" => Some(Self::Full),
            "incremental" | "incr" => Some(Self::Incremental),
            _ => None,
        }
    }
}

/// Body of a data update start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateRequest {
    pub update_type: UpdateKind,
    /// Full updates only: drop existing rows for the source before refetching.
    pub overwrite_mode: bool,
}

/// Typeahead candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub ts_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exchange: String,
}

impl SearchHit {
    /// The value written back into the input field on selection.
    #[must_use]
    pub fn display_symbol(&self) -> &str {
        if self.symbol.is_empty() {
            &self.ts_code
        } else {
            &self.symbol
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataSourceStatus {
    pub data_source: String,
    #[serde(default)]
    pub data_count: u64,
    #[serde(default)]
    pub stock_count: u64,
    #[serde(default)]
    pub latest_date: Option<String>,
}

/// Summary shown on the data-management tab.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataStatus {
    #[serde(default)]
    pub total_stocks: u64,
    #[serde(default)]
    pub latest_date: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_or_null_permissions_become_empty() {
        let absent: User =
            serde_json::from_value(json!({"id": 3, "username": "li", "role": "user"}))
                .expect("decode user");
        assert!(absent.permissions.is_empty());

        let null: User = serde_json::from_value(
            json!({"id": 3, "username": "li", "role": "user", "permissions": null}),
        )
        .expect("decode user");
        assert!(null.permissions.is_empty());
        assert!(null.is_active);
        assert!(!null.expired);
    }

    #[test]
    fn role_accepts_wire_name_and_alias() {
        let user: Role = serde_json::from_value(json!("user")).expect("role");
        let standard: Role = serde_json::from_value(json!("standard")).expect("role");
        assert_eq!(user, Role::Standard);
        assert_eq!(standard, Role::Standard);
        assert!(serde_json::from_value::<Role>(json!("root")).is_err());
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
    }

    #[test]
    fn admin_is_granted_everything() {
        let admin: User = serde_json::from_value(
            json!({"id": 1, "username": "admin", "role": "admin", "permissions": []}),
        )
        .expect("decode admin");
        assert!(admin.is_granted(codes::EXPORT_EXCEL));
        assert!(!admin.has_permission(codes::EXPORT_EXCEL));
    }

    #[test]
    fn compact_timestamp_round_trips_through_json() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": 7,
            "username": "wang",
            "role": "user",
            "is_active": false,
            "valid_until": "20261231235959",
            "created_at": "20250102030405"
        }))
        .expect("decode record");
        let until = record.valid_until.expect("valid_until");
        assert_eq!(until.to_compact(), "20261231235959");
        assert_eq!(until.to_string(), "2026-12-31 23:59:59");
        assert!(serde_json::from_value::<UserRecord>(json!({
            "id": 7, "username": "wang", "role": "user", "valid_until": "2026-12-31"
        }))
        .is_err());
    }

    #[test]
    fn percent_is_computed_and_guarded() {
        let progress = JobProgress {
            current: 25,
            total: 200,
            message: String::new(),
            is_running: true,
        };
        assert!((progress.percent() - 12.5).abs() < f64::EPSILON);
        let unknown = JobProgress::default();
        assert!(unknown.percent().abs() < f64::EPSILON);
        let overshoot = JobProgress {
            current: 9,
            total: 4,
            ..JobProgress::default()
        };
        assert!((overshoot.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn display_symbol_falls_back_to_ts_code() {
        let hit = SearchHit {
            ts_code: "600519.SH".into(),
            ..SearchHit::default()
        };
        assert_eq!(hit.display_symbol(), "600519.SH");
    }
}
