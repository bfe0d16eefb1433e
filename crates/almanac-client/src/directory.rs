//! Admin operations on users, permissions and system settings.
//!
//! Every operation validates its input before a request is issued.

#![allow(missing_docs)]

use std::sync::Arc;

use time::format_description::BorrowedFormatItem;
use time::macros::{format_description, time};
use time::{Date, PrimitiveDateTime};
use tracing::info;

use crate::api::DirectoryApi;
use crate::error::{ClientError, Result};
use crate::model::{
    NewUser, PermissionInfo, PermissionSet, SystemConfig, Timestamp, User, UserRecord, UserUpdate,
};

/// Accepted range of the session lifetime setting, in hours.
pub const SESSION_HOURS_RANGE: std::ops::RangeInclusive<u32> = 1..=8760;

/// Parses the session lifetime field.
pub fn parse_session_hours(text: &str) -> Result<u32> {
    let invalid = || {
        ClientError::validation(format!(
            "Session duration must be between {} and {} hours.",
            SESSION_HOURS_RANGE.start(),
            SESSION_HOURS_RANGE.end()
        ))
    };
    let hours: u32 = text.trim().parse().map_err(|_| invalid())?;
    if SESSION_HOURS_RANGE.contains(&hours) {
        Ok(hours)
    } else {
        Err(invalid())
    }
}

/// Parses an account expiry field. Empty means "never expires".
///
/// Accepts `YYYY-MM-DD` (end of that day), `YYYY-MM-DDTHH:MM`,
/// `YYYY-MM-DD HH:MM:SS` and the compact wire form.
pub fn parse_valid_until(text: &str) -> Result<Option<Timestamp>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(stamp) = Timestamp::parse_compact(text) {
        return Ok(Some(stamp));
    }
    let datetime_forms: [&[BorrowedFormatItem<'static>]; 4] = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
    ];
    for form in datetime_forms {
        if let Ok(value) = PrimitiveDateTime::parse(text, form) {
            return Ok(Some(Timestamp::new(value)));
        }
    }
    if let Ok(date) = Date::parse(text, format_description!("[year]-[month]-[day]")) {
        return Ok(Some(Timestamp::new(date.with_time(time!(23:59:59)))));
    }
    Err(ClientError::validation(format!(
        "Invalid expiry '{text}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS."
    )))
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ClientError::validation(format!("{field} is required.")))
    } else {
        Ok(())
    }
}

/// User directory administration.
pub struct Directory {
    api: Arc<dyn DirectoryApi>,
}

impl Directory {
    pub fn new(api: Arc<dyn DirectoryApi>) -> Self {
        Self { api }
    }

    pub async fn permission_catalog(&self) -> Result<Vec<PermissionInfo>> {
        self.api.permission_catalog().await
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        self.api.list_users().await
    }

    pub async fn get_user(&self, id: i64) -> Result<UserRecord> {
        self.api.get_user(id).await
    }

    /// Returns the new user's id.
    pub async fn create_user(&self, mut user: NewUser) -> Result<i64> {
        require(&user.username, "Username")?;
        require(&user.password, "Password")?;
        user.username = user.username.trim().to_string();
        let id = self.api.create_user(&user).await?;
        info!(id, username = %user.username, "user created");
        Ok(id)
    }

    /// An empty password leaves the stored one unchanged.
    pub async fn update_user(&self, id: i64, mut update: UserUpdate) -> Result<String> {
        require(&update.username, "Username")?;
        update.username = update.username.trim().to_string();
        update.password = update.password.filter(|password| !password.is_empty());
        self.api.update_user(id, &update).await
    }

    /// Refuses to delete the signed-in account.
    pub async fn delete_user(&self, actor: &User, id: i64) -> Result<String> {
        if actor.id == id {
            return Err(ClientError::validation("You cannot delete your own account."));
        }
        let message = self.api.delete_user(id).await?;
        info!(id, "user deleted");
        Ok(message)
    }

    pub async fn user_permissions(&self, id: i64) -> Result<PermissionSet> {
        self.api.user_permissions(id).await
    }

    pub async fn set_user_permissions(&self, id: i64, permissions: &PermissionSet) -> Result<String> {
        self.api.set_user_permissions(id, permissions).await
    }

    pub async fn system_config(&self) -> Result<SystemConfig> {
        self.api.system_config().await
    }

    /// Validates and stores the session lifetime.
    pub async fn set_session_hours(&self, text: &str) -> Result<String> {
        let session_duration_hours = parse_session_hours(text)?;
        self.api
            .set_system_config(SystemConfig {
                session_duration_hours,
            })
            .await
    }
}
