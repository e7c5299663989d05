//! Output formatting utilities for the CLI
//!
//! Tables for nodes, inbound/outbound records and audit entries, plus the
//! colored status lines every command reports through.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use xr_control::NodeOutcome;
use xr_core::time::elapsed_secs;
use xr_core::{AuditEntry, Inbound, Outbound, Server};

/// Format nodes as a table
///
/// The long form adds the node's config path, session id and record ages.
pub fn format_servers(servers: &[Server], long: bool) -> String {
    if servers.is_empty() {
        return "No servers registered".to_string();
    }

    #[derive(Tabled)]
    struct ServerRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "LOCATION")]
        location: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "PROTOCOL")]
        protocol: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    #[derive(Tabled)]
    struct ServerRowDetailed {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "SESSION")]
        session: String,
        #[tabled(rename = "CONFIG")]
        config: String,
        #[tabled(rename = "UPDATED")]
        updated: String,
    }

    if long {
        let rows: Vec<ServerRowDetailed> = servers
            .iter()
            .map(|s| ServerRowDetailed {
                id: s.id.as_i64(),
                name: s.name.clone(),
                address: format!("{}:{}", s.ip_address, s.port),
                status: status_label(s),
                session: s
                    .session()
                    .map(|d| d.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                config: s.config_path.display().to_string(),
                updated: format!("{} ago", format_duration(elapsed_secs(s.updated_at))),
            })
            .collect();
        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<ServerRow> = servers
            .iter()
            .map(|s| ServerRow {
                id: s.id.as_i64(),
                name: s.name.clone(),
                location: s.location.clone(),
                address: format!("{}:{}", s.ip_address, s.port),
                protocol: s.protocol.clone(),
                status: status_label(s),
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format a node's inbound records as a table
pub fn format_inbounds(inbounds: &[Inbound]) -> String {
    if inbounds.is_empty() {
        return "No inbounds".to_string();
    }

    #[derive(Tabled)]
    struct InboundRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PROTOCOL")]
        protocol: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "SETTINGS")]
        settings: String,
    }

    let rows: Vec<InboundRow> = inbounds
        .iter()
        .map(|i| InboundRow {
            id: i.id.as_i64(),
            name: i.name.clone(),
            protocol: i.protocol.clone(),
            port: i.port,
            enabled: yes_no(i.enabled),
            settings: truncate(&i.settings, 32),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a node's outbound records as a table
pub fn format_outbounds(outbounds: &[Outbound]) -> String {
    if outbounds.is_empty() {
        return "No outbounds".to_string();
    }

    #[derive(Tabled)]
    struct OutboundRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PROTOCOL")]
        protocol: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "SETTINGS")]
        settings: String,
    }

    let rows: Vec<OutboundRow> = outbounds
        .iter()
        .map(|o| OutboundRow {
            id: o.id.as_i64(),
            name: o.name.clone(),
            protocol: o.protocol.clone(),
            enabled: yes_no(o.enabled),
            settings: truncate(&o.settings, 32),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format audit entries, newest last
pub fn format_audit(entries: &[AuditEntry]) -> String {
    if entries.is_empty() {
        return "No audit entries".to_string();
    }

    #[derive(Tabled)]
    struct AuditRow {
        #[tabled(rename = "AGE")]
        age: String,
        #[tabled(rename = "SERVER")]
        server: String,
        #[tabled(rename = "ACTION")]
        action: String,
        #[tabled(rename = "DETAILS")]
        details: String,
        #[tabled(rename = "ORIGIN")]
        origin: String,
    }

    let rows: Vec<AuditRow> = entries
        .iter()
        .map(|e| AuditRow {
            age: format_duration(elapsed_secs(e.created_at)),
            server: e
                .server_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            action: e.action.clone(),
            details: e.details.clone(),
            origin: e.origin.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Report the node state an agent-facing operation left behind
pub fn print_outcome(verb: &str, outcome: &NodeOutcome) {
    let server = &outcome.server;
    match &outcome.failure {
        None => print_success(&format!(
            "{} server {} ({}), status: {}",
            verb,
            server.id,
            server.name,
            status_label(server)
        )),
        Some(e) => print_warning(&format!(
            "{} server {} ({}), but the agent failed: {} (status: {})",
            verb,
            server.id,
            server.name,
            e,
            status_label(server)
        )),
    }
}

fn status_label(server: &Server) -> String {
    if server.config_stale {
        format!("{} (stale config)", server.status())
    } else {
        server.status().to_string()
    }
}

fn yes_no(flag: bool) -> String {
    let label = if flag { "yes" } else { "no" };
    label.to_string()
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use xr_core::{InboundDetails, InboundId, ServerDetails, ServerId};

    fn server() -> Server {
        Server::new(
            ServerId(3),
            ServerDetails {
                name: "edge-fra".to_string(),
                location: "Frankfurt".to_string(),
                ip_address: "10.1.0.3".to_string(),
                port: 443,
                protocol: "vless".to_string(),
                config_path: "/etc/xray/edge.json".into(),
            },
        )
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("{\"clients\":[1,2,3]}", 10), "{\"clien...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(format_servers(&[], false), "No servers registered");
        assert_eq!(format_inbounds(&[]), "No inbounds");
        assert_eq!(format_outbounds(&[]), "No outbounds");
        assert_eq!(format_audit(&[]), "No audit entries");
    }

    #[test]
    fn test_server_table_shows_status() {
        let mut s = server();
        let table = format_servers(std::slice::from_ref(&s), false);
        assert!(table.contains("edge-fra"));
        assert!(table.contains("10.1.0.3:443"));
        assert!(table.contains("disconnected"));

        s.config_stale = true;
        let table = format_servers(&[s], true);
        assert!(table.contains("(stale config)"));
        assert!(table.contains("SESSION"));
    }

    #[test]
    fn test_inbound_table() {
        let inbound = Inbound::new(
            InboundId(9),
            ServerId(3),
            InboundDetails {
                name: "main".to_string(),
                protocol: "vless".to_string(),
                port: 8443,
                settings: "{}".to_string(),
                enabled: false,
            },
        );
        let table = format_inbounds(&[inbound]);
        assert!(table.contains("8443"));
        assert!(table.contains("no"));
    }
}
