use crate::constants::app::{APP_NAME, FALLBACK_KEY_FILE_NAME, REGISTRY_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};

fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_home_dir() -> Option<PathBuf> {
    normalize_env_path(env::var("HOME").ok())
        .or_else(|| normalize_env_path(env::var("USERPROFILE").ok()))
}

/// Application home (`$KENSHO_HOME`, else `$HOME/.Kensho`).
pub fn resolve_app_home() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("KENSHO_HOME").ok()) {
        return Some(path);
    }
    resolve_home_dir().map(|home| home.join(format!(".{}", APP_NAME)))
}

/// Expands a leading `~` against the user's home directory.
pub fn expand_home_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let rest = match trimmed.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(trimmed),
    };
    match resolve_home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(trimmed),
    }
}

pub fn resolve_registry_path() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("KENSHO_REGISTRY_PATH").ok()) {
        return path;
    }
    resolve_app_home()
        .unwrap_or_else(env::temp_dir)
        .join(REGISTRY_FILE_NAME)
}

/// Fallback master-key file: `$KENSHO_KEY_PATH`, else `<home_dir>/encryption_key.txt`,
/// else the same file name in the process temp directory.
pub fn resolve_key_path(home_dir: Option<&Path>) -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("KENSHO_KEY_PATH").ok()) {
        return path;
    }
    match home_dir {
        Some(dir) => dir.join(FALLBACK_KEY_FILE_NAME),
        None => env::temp_dir().join(FALLBACK_KEY_FILE_NAME),
    }
}

pub fn resolve_store_info() -> serde_json::Value {
    serde_json::json!({
        "home": resolve_app_home(),
        "registry_path": resolve_registry_path(),
        "key_path": resolve_key_path(resolve_app_home().as_deref()),
    })
}

pub fn ensure_dir_exists(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
