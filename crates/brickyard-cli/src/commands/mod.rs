pub mod backup;
pub mod cluster;
pub mod completions;
pub mod device;
pub mod node;
pub mod volume;

use brickyard_client::{Client, ClientConfig, ClientError};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;
pub const EXIT_UNREACHABLE: u8 = 3;

pub const KIB_PER_GIB: u64 = 1024 * 1024;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Run a slow client call behind a spinner.
pub fn with_spinner<T>(
    msg: &str,
    done: &str,
    f: impl FnOnce() -> Result<T, ClientError>,
) -> Result<T, String> {
    let pb = spinner(msg);
    match f() {
        Ok(value) => {
            spin_ok(&pb, done);
            Ok(value)
        }
        Err(e) => {
            spin_fail(&pb, &format!("{msg} failed"));
            Err(e.to_string())
        }
    }
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "ready" | "online" => Style::new().green().apply_to(state).to_string(),
        "creating" | "modifying" => Style::new().cyan().apply_to(state).to_string(),
        "deleting" => Style::new().yellow().apply_to(state).to_string(),
        "offline" | "failed" => Style::new().red().bold().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn format_kib(kib: u64) -> String {
    if kib >= KIB_PER_GIB {
        format!("{:.1} GiB", kib as f64 / KIB_PER_GIB as f64)
    } else {
        format!("{:.1} MiB", kib as f64 / 1024.0)
    }
}

/// Build a client from `--server`, else the client config file.
pub fn make_client(server: Option<&str>) -> Result<Client, String> {
    let config = match server {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::load_default().map_err(|e| format!("no --server and {e}"))?,
    };
    Ok(Client::from_config(&config))
}
