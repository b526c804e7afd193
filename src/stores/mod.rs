pub mod host_registry;
pub mod memory_secret_store;
