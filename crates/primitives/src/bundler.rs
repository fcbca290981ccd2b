//! Bundler-related primitives

use crate::constants::bundler::BUNDLE_INTERVAL;
use serde::Deserialize;

/// Bundler modes
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum Mode {
    /// Sends bundles automatically every x seconds
    #[serde(rename = "auto")]
    Auto(u64),
    /// Sends bundles upon request
    #[serde(rename = "manual")]
    Manual,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Auto(BUNDLE_INTERVAL)
    }
}

impl Mode {
    /// Bundling interval in seconds for the auto mode
    pub fn interval(&self) -> Option<u64> {
        match self {
            Mode::Auto(interval) => Some(*interval),
            Mode::Manual => None,
        }
    }
}
