pub fn is_falsy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Credential values are encrypted with the master key unless explicitly disabled.
pub fn is_credential_encryption_enabled() -> bool {
    std::env::var("KENSHO_CREDENTIAL_ENCRYPTION")
        .map(|value| !is_falsy(value))
        .unwrap_or(true)
}

pub fn resolve_secret_store_kind() -> String {
    std::env::var("KENSHO_SECRET_STORE")
        .unwrap_or_else(|_| "keyring".to_string())
        .trim()
        .to_lowercase()
}

pub fn read_timeout_ms(key: &str, default_ms: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default_ms)
}
