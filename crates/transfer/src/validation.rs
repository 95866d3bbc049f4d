use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Reduces a client-supplied file identifier to its canonical form.
///
/// Only the plain name components are kept, joined with `/`, so `./a.txt`
/// and `a.txt`, or `sub//a.txt` and `sub/a.txt`, map to the same key.
/// Rejects:
/// - empty identifiers and identifiers with NUL bytes
/// - absolute paths and Windows prefixes (`C:`, `\\server`)
/// - any `..` component
/// - identifiers with no file name (`.`, `dir/`)
pub fn normalize_identifier(identifier: &str) -> Result<String, TransferError> {
    let reject = |reason: &str| TransferError::InvalidPath(format!("{reason}: {identifier:?}"));

    if identifier.is_empty() {
        return Err(reject("empty identifier"));
    }
    if identifier.contains('\0') {
        return Err(reject("NUL byte in identifier"));
    }
    if identifier.ends_with('/') || identifier.ends_with('\\') {
        return Err(reject("identifier names a directory"));
    }

    let mut parts = Vec::new();
    for component in Path::new(identifier).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("parent directory traversal")),
            Component::RootDir | Component::Prefix(_) => return Err(reject("absolute path")),
        }
    }
    if parts.is_empty() {
        return Err(reject("identifier names a directory"));
    }

    Ok(parts.join("/"))
}

/// Validates a file identifier and joins its canonical form onto `root`.
///
/// The identifier may contain sub-directories but must name a file that
/// stays inside `root`. See [`normalize_identifier`].
pub fn validate_upload_path(root: &Path, identifier: &str) -> Result<PathBuf, TransferError> {
    Ok(root.join(normalize_identifier(identifier)?))
}
