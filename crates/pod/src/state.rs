//! Local persisted state: the latest pod id and the user identity.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Input;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// File holding the most recently created/resumed pod id.
const LATEST_POD_FILE: &str = ".latest_pod";

/// File holding the user identity record.
const USER_FILE: &str = ".user.yaml";

fn latest_pod_path(dir: &Path) -> PathBuf {
    dir.join(LATEST_POD_FILE)
}

/// Persist `pod_id` as the latest pod. Failure is a warning, not an error;
/// the pod itself is already up.
pub fn save_latest_pod_id(dir: &Path, pod_id: &str) {
    let path = latest_pod_path(dir);
    match std::fs::write(&path, pod_id) {
        Ok(()) => println!("   Saved pod id to {LATEST_POD_FILE}"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not save latest pod id"),
    }
}

/// Read the persisted latest pod id, if any.
#[must_use]
pub fn get_latest_pod_id(dir: &Path) -> Option<String> {
    let path = latest_pod_path(dir);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let id = raw.trim();
            if id.is_empty() {
                None
            } else {
                Some(id.to_string())
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read latest pod file");
            None
        }
    }
}

/// Forget the persisted latest pod id (after terminate).
pub fn clear_latest_pod_id(dir: &Path) {
    let path = latest_pod_path(dir);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove latest pod file");
        }
    }
}

/// User identity record, written once on first interactive setup.
#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    name: String,
}

/// Lowercase alphanumeric with hyphens/underscores allowed.
#[must_use]
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Resolve the username: config override first, then the identity file,
/// otherwise prompt once and persist the answer.
pub fn get_or_prompt_user(dir: &Path, override_name: Option<&str>) -> Result<String> {
    if let Some(name) = override_name {
        let name = name.trim().to_lowercase();
        if !is_valid_username(&name) {
            bail!("Username must be alphanumeric (hyphens/underscores allowed)");
        }
        return Ok(name);
    }

    let path = dir.join(USER_FILE);
    if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record: UserRecord = serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid user record {}", path.display()))?;
        return Ok(record.name);
    }

    if !std::io::stdin().is_terminal() {
        bail!("No user identity configured; set user_name in config.yaml or create {USER_FILE}");
    }

    println!("\nWelcome! Your username prefixes pod names so your pods are easy to spot.");
    println!("It will be saved in {USER_FILE} (gitignore it).\n");

    let name: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Username (lowercase, alphanumeric)")
        .validate_with(|input: &String| {
            if is_valid_username(input.trim()) {
                Ok(())
            } else {
                Err("must be lowercase alphanumeric (hyphens/underscores allowed)")
            }
        })
        .interact_text()?;
    let name = name.trim().to_string();

    let record = UserRecord { name: name.clone() };
    std::fs::write(&path, serde_yaml::to_string(&record)?)
        .with_context(|| format!("Could not save {}", path.display()))?;
    println!("User identity saved to {}", path.display());

    Ok(name)
}
