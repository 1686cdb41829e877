use std::fs;
use std::path::Path;

use crate::primitives::pager::{load_image, Pager, TreeMeta};

use crate::admin::error::{AdminError, Result};

/// Loads the page image at `path` into a fresh pager.
///
/// # Errors
///
/// Returns [`AdminError::MissingImage`] if nothing exists at `path`, or the
/// load error if the image does not decode.
pub fn open_image(path: &Path) -> Result<(Pager, TreeMeta)> {
    if !path.exists() {
        return Err(AdminError::missing_image(path));
    }
    Ok(load_image(path)?)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
