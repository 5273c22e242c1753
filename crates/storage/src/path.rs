//! Remote key normalisation.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Turn a remote key such as `tici/D1_part2/` into its canonical relative
/// form, resolving `.` and `..` without ever leaving the storage root.
///
/// NUL bytes are rejected: they survive [`Path::components`] but truncate
/// the name in any C API downstream.
///
/// ```
/// use rlogsync_storage::normalize_key;
/// use std::path::Path;
///
/// assert_eq!(normalize_key("tici//./D1/").unwrap(), Path::new("tici/D1"));
/// assert!(normalize_key("tici/../../D1").is_err());
/// ```
pub fn normalize(key: impl AsRef<Path>) -> Result<PathBuf> {
    let key = key.as_ref();
    let invalid = || ErrorKind::InvalidKey(key.to_path_buf());
    let mut parts = Vec::new();
    for component in key.components() {
        match component {
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir => {},
            Component::ParentDir if parts.pop().is_some() => {},
            Component::ParentDir | Component::Prefix(_) => exn::bail!(invalid()),
        }
    }
    if parts.is_empty() {
        exn::bail!(invalid());
    }
    Ok(parts.into_iter().collect())
}
