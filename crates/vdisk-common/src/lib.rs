//! vdisk common - Shared types and utilities
//!
//! This crate provides the identifiers, result codes, configuration and
//! hashing helpers used by every vdisk component.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{DigestCalculator, ObjectDigest};
pub use config::Config;
pub use error::{Error, OpResult, Result, ResultCode};
pub use types::*;
