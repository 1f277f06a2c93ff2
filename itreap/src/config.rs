use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables for a [`TreeIndex`](crate::TreeIndex).
///
/// ```toml
/// seed = 42
/// stream_capacity = 256
/// ```
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct IndexConfig {
    /// Seed for the priority generator. `None` seeds from the OS, so tree
    /// shapes differ between runs.
    pub seed: Option<u64>,
    /// Capacity of the channel behind threaded result streams. `None` means
    /// unbounded.
    pub stream_capacity: Option<usize>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl IndexConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = Some(capacity);
        self
    }
}

impl TryFrom<&Path> for IndexConfig {
    type Error = ConfigError;

    fn try_from(path: &Path) -> ConfigResult<Self> {
        let toml_str = read_to_string(path)?;
        let config = toml::from_str(&toml_str)?;
        Ok(config)
    }
}
