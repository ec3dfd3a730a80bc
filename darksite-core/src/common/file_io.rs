//! File I/O helpers with consistent error context
//!
//! Every file darksite rewrites goes through [`write_atomic`]: a temporary
//! file in the destination directory followed by a rename, so a reader never
//! observes a half-written config.

use crate::error::{DarksiteError, DarksiteResult};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Read a text file, naming `context` in the error
pub async fn read_text_with_context<P: AsRef<Path>>(path: P, context: &str) -> DarksiteResult<String> {
    let path = path.as_ref();
    debug!("Reading {} from {:?}", context, path);

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DarksiteError::file(&format!("read {}", context), path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Like [`read_text_with_context`], but a missing file is `None`
pub async fn read_optional_text<P: AsRef<Path>>(
    path: P,
    context: &str,
) -> DarksiteResult<Option<String>> {
    match read_text_with_context(path, context).await {
        Ok(text) => Ok(Some(text)),
        Err(DarksiteError::FileOperation { source, .. })
            if source.kind() == io::ErrorKind::NotFound =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Permission bits of an existing file
pub fn file_mode(path: &Path) -> Option<u32> {
    std::fs::metadata(path)
        .ok()
        .map(|meta| meta.permissions().mode() & 0o7777)
}

/// Atomically replace `path` with `contents`.
///
/// The mode of an existing file is kept; a new file gets `default_mode`.
pub fn write_atomic(path: &Path, contents: &[u8], default_mode: u32) -> DarksiteResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mode = file_mode(path).unwrap_or(default_mode);
    debug!("Atomically writing {:?} (mode {:o})", path, mode);

    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| DarksiteError::file("create temp file", dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| DarksiteError::file("write temp file", tmp.path(), e))?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))
        .map_err(|e| DarksiteError::file("chmod temp file", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| DarksiteError::file("sync temp file", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| DarksiteError::file("rename into place", path, e.error))?;
    Ok(())
}

/// Create `path` (and parents) and set its mode
pub async fn ensure_dir(path: &Path, mode: u32) -> DarksiteResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| DarksiteError::file("create directory", path, e))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| DarksiteError::file("chmod directory", path, e))
}

/// Hand `path` to `user` and that user's primary group
pub fn set_owner(path: &Path, user: &str) -> DarksiteResult<()> {
    let account = nix::unistd::User::from_name(user)
        .map_err(|e| DarksiteError::file("look up owner", path, io::Error::from(e)))?
        .ok_or_else(|| DarksiteError::InvalidInput {
            field: "user".to_string(),
            message: format!("no such user '{}'", user),
        })?;
    nix::unistd::chown(path, Some(account.uid), Some(account.gid))
        .map_err(|e| DarksiteError::file("chown", path, io::Error::from(e)))
}
