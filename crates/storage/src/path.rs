//! Path validation and partitioned destination generation.
//!
//! [`validate`] prevents path traversal out of the storage root — this is a
//! security invariant, not a convenience. [`partitioned`] generates upload
//! destinations that avoid both filename collisions and unbounded directory
//! fan-out.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};
use time::UtcDateTime;

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize non-UTF8 bytes or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use fieldops_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("projects/42/report.pdf").is_ok());
/// assert!(validate_path("a/../file.pdf").is_ok()); // (never leaves storage root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves storage root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./path.pdf/").unwrap(),
///     Path::new("correct/path.pdf")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling, rather
    // than splitting on separators by hand.
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls — reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            // Drive letters and UNC prefixes have no business in logical paths.
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Generates a partitioned destination path for an upload.
///
/// The result is `base_path/YYYY/MM/<prefix>_<filename>` where the `YYYY/MM`
/// component keeps any single directory from accumulating every upload ever
/// made, and the random hex prefix keeps two unrelated uploads named
/// `photo.jpg` from clobbering each other.
///
/// This is a *generator*, not a lookup: calling it twice with the same
/// arguments yields two different destinations. Callers persist the returned
/// path (or the [`StoredPath`](crate::StoredPath) token from `put`) — there
/// is no way to re-derive it.
///
/// # Errors
/// Fails only when `filename` is empty or fails [`validate`] after
/// sanitization.
///
/// # Examples
///
/// ```
/// use fieldops_storage::partitioned_path;
/// let a = partitioned_path("photo.jpg", "projects/42/files").unwrap();
/// let b = partitioned_path("photo.jpg", "projects/42/files").unwrap();
/// assert_ne!(a, b);
/// assert!(a.starts_with("projects/42/files"));
/// assert!(a.to_str().unwrap().ends_with("photo.jpg"));
/// ```
pub fn partitioned(filename: impl AsRef<str>, base_path: impl AsRef<Path>) -> Result<PathBuf> {
    let filename = filename.as_ref().trim();
    if filename.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(filename)));
    }
    // Keep only the basename; an uploaded "filename" containing separators
    // must not be allowed to pick its own directory.
    let basename = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| validate(n).is_ok())
        .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidPath(PathBuf::from(filename))))?;
    let now = UtcDateTime::now();
    let discriminator: u32 = rand::random();
    let leaf = format!("{:04}/{:02}/{discriminator:08x}_{basename}", now.year(), u8::from(now.month()));
    validate(base_path.as_ref().join(leaf))
}
