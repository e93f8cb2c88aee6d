//! Output formatting utilities for the CLI

use tabled::{settings::Style, Table, Tabled};

use crate::ipc::TunnelInfo;

/// Format scheduled tunnels as an ASCII table
///
/// Returns "No tunnels scheduled" for an empty list.
pub fn format_tunnels(tunnels: &[TunnelInfo]) -> String {
    if tunnels.is_empty() {
        return "No tunnels scheduled".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "SERVER")]
        server: String,
        #[tabled(rename = "FORWARDS")]
        forwards: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "ATTEMPT")]
        attempt: u32,
        #[tabled(rename = "LAST ERROR")]
        last_error: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            id: t.id.clone(),
            server: format!("{}@{}", t.username, t.address),
            forwards: t.forwards.join("\n"),
            state: t.state.to_string(),
            attempt: t.attempt,
            last_error: t
                .last_error
                .as_deref()
                .map(|e| truncate(e, 60))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
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
