pub mod credentials;
pub mod encryption;
pub mod host_database;
pub mod logger;
pub mod master_key;
pub mod node_api;
pub mod secret_store;
