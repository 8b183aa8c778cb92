/*!
 * Core Module
 * Fundamental harness types, configuration, and error handling
 */

pub mod bitset;
pub mod config;
pub mod errors;
pub mod types;

// Re-export for convenience
pub use bitset::BitSet;
pub use config::{Capabilities, HarnessConfig};
pub use errors::*;
pub use types::*;
