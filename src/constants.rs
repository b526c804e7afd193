pub mod app {
    pub const APP_NAME: &str = "Kensho";
    pub const MASTER_KEY_ENTRY: &str = "KenshoEncryptionKey";
    pub const REGISTRY_FILE_NAME: &str = "saved_hosts";
    pub const FALLBACK_KEY_FILE_NAME: &str = "encryption_key.txt";
}

pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const SHIDAI_DEFAULT_PORT: u16 = 8282;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_STATUS_MS: u64 = 3_000;
    pub const TIMEOUT_DASHBOARD_MS: u64 = 5_000;
    pub const TIMEOUT_COMMAND_MS: u64 = 10_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 15_000;
    pub const KEEPALIVE_MAX_FAILURES: u32 = 3;
    pub const POLL_INTERVAL_MS: u64 = 10;
    pub const SESSION_POLL_TIMEOUT_MS: u32 = 200;
}

pub mod endpoints {
    pub const SEKIN_EXECUTE_PATH: &str = "/api/execute";
    pub const SEKIN_STATUS_PATH: &str = "/api/status";
    pub const SHIDAI_STATUS_PATH: &str = "/status";
    pub const SHIDAI_VALIDATOR_PATH: &str = "/validator";
    pub const SHIDAI_DASHBOARD_PATH: &str = "/dashboard";
    pub const MANAGEMENT_HOST: &str = "localhost";
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;
    pub const MAX_HEADER_BYTES: usize = 64 * 1024;
    pub const ERROR_BODY_SNIPPET_BYTES: usize = 512;
}

pub mod buffers {
    pub const IO_CHUNK_SIZE: usize = 8192;
    pub const CRYPTO_KEY_SIZE: usize = 32;
    pub const CRYPTO_NONCE_SIZE: usize = 12;
    pub const CRYPTO_TAG_SIZE: usize = 16;
    pub const CRYPTO_SALT_SIZE: usize = 16;
}

pub mod crypto {
    pub const KEY_DERIVATION_CONTEXT: &[u8] = b"kensho/credential-subkey/v1";
    pub const ENCRYPTED_VALUE_PREFIX: &str = "enc:v1:";
}
