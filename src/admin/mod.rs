#![forbid(unsafe_code)]

//! Administrative entry points over saved page images.
//!
//! This module loads page images, runs the structural and space checks over
//! them and reports the outcome in a serializable form. It can also write
//! demo images, optionally damaged, for trying the checker out.

mod demo;
mod error;
mod options;
mod util;
mod verify;

/// Sample image generation.
pub use demo::{write_demo_image, DemoCorruption, DemoOptions, DemoReport};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Configuration options for opening an image in admin mode.
pub use options::AdminOpenOptions;

/// Image verification.
pub use verify::{
    verify, verify_pager, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity,
};

pub use crate::primitives::pager::PagerOptions;
pub use crate::storage::btree::CheckOptions;

/// Utility functions for opening images.
pub use util::open_image;
