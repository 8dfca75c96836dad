//! Storage helpers shared by the index, the change tracker and the daemon.

pub mod fs;

pub use fs::{ensure_secure_dir, open_private_append, remove_if_exists, restrict_to_owner, write_atomic};
