pub mod feature_flags;
pub mod fs_atomic;
pub mod host_id;
pub mod paths;
