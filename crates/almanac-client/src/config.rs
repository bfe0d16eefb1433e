//! Client configuration loading (`almanac.toml`).

#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::{ClientError, Result};
use crate::jobs::PollTiming;
use crate::search::SearchTiming;

pub const CONFIG_FILE_NAME: &str = "almanac.toml";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_SUPPORT_CONTACT: &str = "your administrator";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server: ServerConfig,
    /// Out-of-band channel named in the expired-account notice.
    pub support_contact: SmolStr,
    pub jobs: PollTiming,
    pub search: SearchConfig,
    pub log_level: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub base_url: SmolStr,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub timing: SearchTiming,
    pub limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: SmolStr::new(DEFAULT_BASE_URL),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timing: SearchTiming::default(),
            limit: 10,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            support_contact: SmolStr::new(DEFAULT_SUPPORT_CONTACT),
            jobs: PollTiming::default(),
            search: SearchConfig::default(),
            log_level: SmolStr::new("info"),
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|err| ClientError::Config(format!("{CONFIG_FILE_NAME}: {err}")))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: ClientToml = toml::from_str(text)
            .map_err(|err| ClientError::Config(format!("{CONFIG_FILE_NAME}: {err}")))?;
        raw.into_config()
    }

    /// Replaces the server base URL, keeping the validation of the file path.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.server.base_url = parse_base_url(base_url)?;
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientToml {
    server: Option<ServerSection>,
    session: Option<SessionSection>,
    jobs: Option<JobsSection>,
    search: Option<SearchSection>,
    log: Option<LogSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    support_contact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobsSection {
    poll_interval_ms: Option<u64>,
    grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchSection {
    debounce_ms: Option<u64>,
    dismiss_ms: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

impl ClientToml {
    fn into_config(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();

        let server = match self.server {
            Some(section) => ServerConfig {
                base_url: match section.base_url {
                    Some(url) => parse_base_url(&url)?,
                    None => defaults.server.base_url,
                },
                timeout: non_zero_ms("server.timeout_ms", section.timeout_ms)?
                    .unwrap_or(defaults.server.timeout),
            },
            None => defaults.server,
        };

        let support_contact = self
            .session
            .and_then(|section| section.support_contact)
            .map(|contact| contact.trim().to_string())
            .filter(|contact| !contact.is_empty())
            .map_or(defaults.support_contact, SmolStr::new);

        let jobs = match self.jobs {
            Some(section) => PollTiming {
                interval: non_zero_ms("jobs.poll_interval_ms", section.poll_interval_ms)?
                    .unwrap_or(defaults.jobs.interval),
                grace: section
                    .grace_ms
                    .map_or(defaults.jobs.grace, Duration::from_millis),
            },
            None => defaults.jobs,
        };

        let search = match self.search {
            Some(section) => {
                let limit = section.limit.unwrap_or(defaults.search.limit);
                if limit == 0 {
                    return Err(ClientError::Config("search.limit must be at least 1".into()));
                }
                SearchConfig {
                    timing: SearchTiming {
                        debounce: non_zero_ms("search.debounce_ms", section.debounce_ms)?
                            .unwrap_or(defaults.search.timing.debounce),
                        dismiss_delay: section
                            .dismiss_ms
                            .map_or(defaults.search.timing.dismiss_delay, Duration::from_millis),
                    },
                    limit,
                }
            }
            None => defaults.search,
        };

        let log_level = match self.log.and_then(|section| section.level) {
            Some(level) => parse_log_level(&level)?,
            None => defaults.log_level,
        };

        Ok(ClientConfig {
            server,
            support_contact,
            jobs,
            search,
            log_level,
        })
    }
}

fn parse_base_url(text: &str) -> Result<SmolStr> {
    let trimmed = text.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"));
    match host {
        Some(host) if !host.is_empty() => Ok(SmolStr::new(trimmed)),
        _ => Err(ClientError::Config(format!(
            "server.base_url '{text}' must start with http:// or https://"
        ))),
    }
}

fn parse_log_level(text: &str) -> Result<SmolStr> {
    let lowered = text.trim().to_ascii_lowercase();
    if LOG_LEVELS.contains(&lowered.as_str()) {
        Ok(SmolStr::new(lowered))
    } else {
        Err(ClientError::Config(format!("invalid log.level '{text}'")))
    }
}

fn non_zero_ms(key: &str, value: Option<u64>) -> Result<Option<Duration>> {
    match value {
        Some(0) => Err(ClientError::Config(format!("{key} must be greater than zero"))),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}
