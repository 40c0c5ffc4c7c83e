use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use brickyard_client::Client;
use std::path::Path;
use tempfile::NamedTempFile;

/// Download a database export and write it to `dest` atomically.
pub fn run(client: &Client, dest: &Path, json: bool) -> Result<u8, String> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| format!("cannot write to {}: {e}", dir.display()))?;

    let pb = spinner("downloading backup…");
    let bytes = client.backup(&mut tmp).map_err(|e| {
        spin_fail(&pb, "backup failed");
        e.to_string()
    })?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("cannot sync backup: {e}"))?;
    tmp.persist(dest)
        .map_err(|e| format!("cannot save {}: {e}", dest.display()))?;
    spin_ok(&pb, "backup complete");

    if json {
        let payload = serde_json::json!({
            "path": dest.display().to_string(),
            "bytes": bytes,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("wrote {bytes} bytes to {}", dest.display());
    }
    Ok(EXIT_SUCCESS)
}
