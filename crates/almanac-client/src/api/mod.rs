//! Server contracts consumed by the controller.
//!
//! Each trait is one seam of the dashboard backend. [`HttpApi`] implements
//! all of them over HTTP; tests substitute in-memory fakes per seam.

#![allow(missing_docs)]

mod envelope;
mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{
    DataStatus, JobProgress, JobStart, NewUser, PermissionInfo, PermissionSet, SearchHit,
    SystemConfig, UpdateRequest, User, UserRecord, UserUpdate,
};

pub use envelope::{failure_codes, mentions_permission, Envelope};
pub use http::{HttpApi, SESSION_COOKIE};

/// Authentication endpoints.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Identity behind the ambient credentials. `success: false` surfaces as
    /// [`crate::ClientError::Unauthenticated`].
    async fn current_user(&self) -> Result<User>;

    async fn login(&self, username: &str, password: &str) -> Result<User>;

    async fn logout(&self) -> Result<()>;

    /// Returns the server's confirmation message.
    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<String>;
}

/// User, permission and system administration endpoints.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn permission_catalog(&self) -> Result<Vec<PermissionInfo>>;

    async fn list_users(&self) -> Result<Vec<UserRecord>>;

    async fn get_user(&self, id: i64) -> Result<UserRecord>;

    /// Returns the new user's id.
    async fn create_user(&self, user: &NewUser) -> Result<i64>;

    async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<String>;

    async fn delete_user(&self, id: i64) -> Result<String>;

    async fn user_permissions(&self, id: i64) -> Result<PermissionSet>;

    async fn set_user_permissions(&self, id: i64, permissions: &PermissionSet) -> Result<String>;

    async fn system_config(&self) -> Result<SystemConfig>;

    async fn set_system_config(&self, config: SystemConfig) -> Result<String>;
}

/// Data-update job and summary endpoints.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn start_update(&self, request: UpdateRequest) -> Result<JobStart>;

    async fn update_progress(&self) -> Result<JobProgress>;

    async fn data_status(&self) -> Result<DataStatus>;
}

/// Keyword lookup of instruments.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search_stocks(&self, keyword: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Binary answer of a file-producing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDownload {
    pub content_disposition: Option<String>,
    pub bytes: Vec<u8>,
}

/// File-producing endpoints.
#[async_trait]
pub trait ExportApi: Send + Sync {
    async fn export(&self, path: &str, body: &Value) -> Result<RawDownload>;
}
