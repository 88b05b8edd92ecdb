//! CLI Config Command
//!
//! Bootstraps a config file populated with defaults.

use std::path::Path;

use anyhow::Result;

use edgechat_config::{apply_all_defaults, write_config, EdgeChatConfig};

use crate::terminal_output::{note_success, note_warn};

/// Write a default config to `path`. Returns false if one exists and `force` is off.
pub async fn init(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        note_warn(&format!(
            "{} already exists; pass --force to overwrite (a backup is kept)",
            path.display()
        ));
        return Ok(false);
    }
    write_config(&apply_all_defaults(EdgeChatConfig::default()), path).await?;
    note_success(&format!("Wrote {}", path.display()));
    Ok(true)
}
