//! Custom Resource Definitions for the AppPlatform operator
//!
//! This module defines the AppPlatform CRD and its shared configuration types.

mod platform;
pub mod types;

#[cfg(test)]
mod tests;

pub use platform::{AppPlatform, AppPlatformSpec, AppPlatformStatus, SpecValidationError};
pub use types::*;
