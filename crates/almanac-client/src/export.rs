//! Spreadsheet downloads.

#![allow(missing_docs)]

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::api::ExportApi;
use crate::error::{ClientError, Result};
use crate::model::User;
use crate::navigation::export_enabled;

/// The server's file-producing statistics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    StockStatistics,
    MultiMonthStatistics,
    MonthFilter,
    IndustryStatistics,
    IndustryTopStocks,
    CompareSources,
}

impl ExportKind {
    pub const ALL: [Self; 6] = [
        Self::StockStatistics,
        Self::MultiMonthStatistics,
        Self::MonthFilter,
        Self::IndustryStatistics,
        Self::IndustryTopStocks,
        Self::CompareSources,
    ];

    /// Endpoint slug, also used as the command-line name.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::StockStatistics => "stock-statistics",
            Self::MultiMonthStatistics => "multi-month-statistics",
            Self::MonthFilter => "month-filter",
            Self::IndustryStatistics => "industry-statistics",
            Self::IndustryTopStocks => "industry-top-stocks",
            Self::CompareSources => "compare-sources",
        }
    }

    #[must_use]
    pub fn path(self) -> String {
        format!("/api/export/{}", self.slug())
    }

    /// Name used when the response carries no usable filename.
    #[must_use]
    pub fn default_filename(self) -> &'static str {
        match self {
            Self::StockStatistics => "股票统计.xlsx",
            Self::MultiMonthStatistics => "按月统计.xlsx",
            Self::MonthFilter => "月份筛选统计.xlsx",
            Self::IndustryStatistics => "行业统计.xlsx",
            Self::IndustryTopStocks => "行业前20支股票.xlsx",
            Self::CompareSources => "数据源对比.xlsx",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.slug() == text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Download {
    /// The filename reduced to its last path component.
    #[must_use]
    pub fn safe_filename(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .unwrap_or("download.xlsx")
    }
}

/// Extracts the filename from a `Content-Disposition` header value.
///
/// The RFC 5987 `filename*` form wins over a plain `filename`.
#[must_use]
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut extended = None;
    let mut plain = None;
    for param in split_params(header) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => extended = decode_extended(value.trim()),
            "filename" => plain = Some(unquote(value.trim())),
            _ => {}
        }
    }
    extended
        .or(plain)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Splits on `;` outside double quotes.
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (index, ch) in header.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(header[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    params.push(header[start..].trim());
    params
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// `charset'lang'percent-encoded`
fn decode_extended(value: &str) -> Option<String> {
    let value = unquote(value);
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    if !charset.is_empty() && !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    urlencoding::decode(encoded).ok().map(|name| name.into_owned())
}

/// Downloads exports on behalf of the signed-in user.
pub struct Exporter {
    api: Arc<dyn ExportApi>,
}

impl Exporter {
    pub fn new(api: Arc<dyn ExportApi>) -> Self {
        Self { api }
    }

    /// Refuses locally when the user may not export.
    pub async fn download(&self, user: Option<&User>, kind: ExportKind, body: &Value) -> Result<Download> {
        let Some(user) = user else {
            return Err(ClientError::Unauthenticated {
                message: "Sign in first.".into(),
            });
        };
        if !export_enabled(user) {
            return Err(ClientError::PermissionDenied {
                message: "You do not have permission to export.".into(),
            });
        }
        let raw = self.api.export(&kind.path(), body).await?;
        let filename = raw
            .content_disposition
            .as_deref()
            .and_then(filename_from_content_disposition)
            .unwrap_or_else(|| kind.default_filename().to_string());
        info!(kind = kind.slug(), %filename, bytes = raw.bytes.len(), "export downloaded");
        Ok(Download {
            filename,
            bytes: raw.bytes,
        })
    }
}
