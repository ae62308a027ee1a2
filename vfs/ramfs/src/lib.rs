mod config;
mod fs;
mod node;

pub use config::RamFsConfig;
pub use fs::RamFs;
pub use node::{AclEntry, RamNode};
