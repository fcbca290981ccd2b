//! Account abstraction (ERC-4337) bundling
//!
//! Builds `handleOps` transactions out of pooled user operations and drives
//! the periodic bundle cycle.

mod bundler;
mod ethereum;
mod service;

pub use bundler::{Bundler, SendBundleOp};
pub use ethereum::EthereumClient;
pub use service::BundleService;
