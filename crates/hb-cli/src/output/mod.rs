//! Output formatting utilities for the CLI
//!
//! Tables for job listings, status displays, and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use hb_core::time::elapsed_since;
use hb_core::types::{JobStatusReport, JobSummary};
use hb_core::PortMapEntry;

use crate::ipc::OrchestratorStatus;

/// Format a list of jobs as an ASCII table
///
/// Returns "No tracked jobs" when the list is empty.
pub fn format_jobs(jobs: &[JobSummary]) -> String {
    if jobs.is_empty() {
        return "No tracked jobs".to_string();
    }

    #[derive(Tabled)]
    struct JobRow {
        #[tabled(rename = "JOB ID")]
        id: String,
        #[tabled(rename = "CLUSTER")]
        cluster: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "NODE")]
        node: String,
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
        #[tabled(rename = "AGE")]
        age: String,
    }

    let rows: Vec<JobRow> = jobs
        .iter()
        .map(|j| JobRow {
            id: j.id.clone(),
            cluster: truncate(&j.login_node, 24),
            state: j.state.to_string(),
            node: j.node.clone().unwrap_or_else(|| "-".to_string()),
            tunnel: if j.forwarding { "up" } else { "-" }.to_string(),
            age: format_duration(elapsed_since(j.created_at).as_secs()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the result of one job poll
pub fn format_job_status(job_id: &str, report: &JobStatusReport) -> String {
    let dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };

    let mut output = String::new();
    output.push_str(&format!("Job {}: {}\n", job_id, report.state));
    output.push_str(&format!("Scheduler state: {}\n", dash(&report.scheduler_state)));
    output.push_str(&format!("Node: {}\n", dash(&report.node)));
    output.push_str(&format!("Start time: {}\n", dash(&report.eta)));
    if !report.port_map.is_empty() {
        output.push_str("Forwarded ports:\n");
        output.push_str(&format_port_map(&report.port_map));
        output.push('\n');
    }
    output
}

/// Format a port map as an ASCII table
pub fn format_port_map(port_map: &[PortMapEntry]) -> String {
    #[derive(Tabled)]
    struct PortRow {
        #[tabled(rename = "LOCAL")]
        local: u16,
        #[tabled(rename = "REMOTE")]
        remote: u16,
    }

    let rows: Vec<PortRow> = port_map
        .iter()
        .map(|e| PortRow {
            local: e.local_port,
            remote: e.remote_port,
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format orchestrator status as a human-readable string
pub fn format_status(status: &OrchestratorStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Orchestrator Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Address: {}\n", status.ipc_address));
    output.push_str(&format!(
        "Uptime: {}\n",
        format_duration(status.uptime_secs)
    ));
    output.push_str(&format!("Tracked Jobs: {}\n", status.job_count));
    output.push_str(&format!("Active Tunnels: {}\n", status.forwarding_count));

    output
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

fn print_colored(to_stderr: bool, color: crossterm::style::Color, symbol: &str, msg: &str) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let mut out: Box<dyn std::io::Write> = if to_stderr {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    };
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored(false, crossterm::style::Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    print_colored(true, crossterm::style::Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    print_colored(true, crossterm::style::Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored(false, crossterm::style::Color::Cyan, "ℹ ", msg);
}
