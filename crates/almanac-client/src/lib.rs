//! `almanac-client` - controller core of the Almanac analytics dashboard.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

/// Server contracts and the HTTP transport.
pub mod api;
/// Client configuration (`almanac.toml`).
pub mod config;
/// Session and navigation composed into a screen view-model.
pub mod dashboard;
/// User directory administration.
pub mod directory;
/// Client errors.
pub mod error;
/// Spreadsheet downloads.
pub mod export;
/// Long-running job polling.
pub mod jobs;
/// Wire data model.
pub mod model;
/// Tab visibility and the active tab.
pub mod navigation;
/// Debounced typeahead search.
pub mod search;
/// Authentication lifecycle.
pub mod session;

pub use config::ClientConfig;
pub use dashboard::{Dashboard, DashboardView};
pub use error::{ClientError, Result};
pub use session::SessionManager;
