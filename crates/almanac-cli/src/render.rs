//! Plain-text rendering of the dashboard view-models.

use std::fmt::Write as _;

use almanac_client::jobs::ProgressPanel;
use almanac_client::model::{DataStatus, PermissionInfo, PermissionSet, SearchHit, UserRecord};
use almanac_client::DashboardView;

/// Header line: who is signed in and where.
pub fn badge(view: &DashboardView) -> String {
    let Some(signed_in) = &view.signed_in else {
        return "Not signed in. Use `login` to begin.".to_string();
    };
    let mut line = format!("{} ({})", signed_in.username, signed_in.role);
    if let Some(valid_until) = signed_in.valid_until {
        let _ = write!(line, ", valid until {valid_until}");
    }
    if let Some(tab) = view.navigation.active() {
        let _ = write!(line, " | {}", tab.title);
    }
    line
}

/// Feature switches derived from the signed-in account.
pub fn capabilities(view: &DashboardView) -> String {
    let flag = |on: bool| if on { "on" } else { "off" };
    format!(
        "export {} | data {} | admin {}",
        flag(view.export_enabled),
        flag(view.data_panel),
        flag(view.admin_controls)
    )
}

pub fn panel(panel: &ProgressPanel) -> String {
    if !panel.visible {
        return "No update in progress.".to_string();
    }
    let state = if panel.running { "running" } else { "finished" };
    format!(
        "{state}: {}/{} ({:.1}%) {}",
        panel.current, panel.total, panel.percent, panel.message
    )
}

pub fn data_status(status: &DataStatus) -> String {
    let mut out = format!(
        "Instruments: {}\nLatest trading day: {}\n",
        status.total_stocks,
        status.latest_date.as_deref().unwrap_or("-")
    );
    for source in &status.data_sources {
        let _ = writeln!(
            out,
            "  {:<12} {:>10} rows {:>6} instruments  latest {}",
            source.data_source,
            source.data_count,
            source.stock_count,
            source.latest_date.as_deref().unwrap_or("-")
        );
    }
    out
}

pub fn search_hit(hit: &SearchHit) -> String {
    if hit.exchange.is_empty() {
        format!("{} {}", hit.display_symbol(), hit.name)
    } else {
        format!("{} {} [{}]", hit.display_symbol(), hit.name, hit.exchange)
    }
}

pub fn users(records: &[UserRecord]) -> String {
    let mut out = format!(
        "{:>4}  {:<16} {:<6} {:<8} {}\n",
        "id", "username", "role", "active", "valid until"
    );
    for record in records {
        let valid_until = record
            .valid_until
            .map_or_else(|| "never".to_string(), |ts| ts.to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:<16} {:<6} {:<8} {valid_until}",
            record.id,
            record.username,
            record.role.as_str(),
            if record.is_active { "yes" } else { "no" }
        );
    }
    out
}

pub fn permissions(set: &PermissionSet) -> String {
    if set.is_empty() {
        return "(none)".to_string();
    }
    set.iter()
        .map(|code| code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn catalog(entries: &[PermissionInfo]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{:<22} {}  {}", entry.code.as_str(), entry.name, entry.description);
    }
    out
}
