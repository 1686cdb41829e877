use serde::{Deserialize, Serialize};

use crate::primitives::pager::{PagerOptions, TreeMeta};
use crate::storage::btree::CheckOptions;

/// Common options used when opening a page image for administrative commands.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminOpenOptions {
    /// Pager configuration used when writing new images.
    pub pager: PagerOptions,
    /// Checker configuration.
    pub check: CheckOptions,
    /// Most findings a verify report lists. Defects past the cap are still
    /// counted.
    pub max_findings: usize,
    /// Take the stable and unstable generations from the image header instead
    /// of `check`.
    pub generations_from_image: bool,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            pager: PagerOptions::default(),
            check: CheckOptions::default(),
            max_findings: 32,
            generations_from_image: true,
        }
    }
}

impl AdminOpenOptions {
    /// Checker options for a tree described by `meta`.
    pub fn check_options(&self, meta: &TreeMeta) -> CheckOptions {
        let mut options = self.check.clone();
        if self.generations_from_image {
            options.stable_generation = meta.stable_generation;
            options.unstable_generation = meta.unstable_generation;
        }
        options
    }
}
