//! Block Storage Configuration
//!
//! ## BlockConfig
//!
//! Controls where block file sets live and the permissions they are
//! created with:
//!
//! - **root**: directory under which per-shard subdirectories are created
//! - **file_mode**: unix mode for newly created files (default 0o666)
//! - **dir_mode**: unix mode for newly created shard directories
//!   (default 0o755)
//!
//! ## Usage
//!
//! ```ignore
//! use tidestore_storage::BlockConfig;
//!
//! let config = BlockConfig {
//!     root: "/var/lib/tidestore/blocks".into(),
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Directory holding one subdirectory per shard
    pub root: PathBuf,

    /// Mode for newly created files (default: 0o666)
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Mode for newly created shard directories (default: 0o755)
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/blocks"),
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
        }
    }
}

fn default_file_mode() -> u32 {
    0o666
}

fn default_dir_mode() -> u32 {
    0o755
}
