// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk repository layout and upload staging.
//!
//! Everything lives under a single repository root:
//!
//! ```text
//! <root>/tmp/<pid>.<counter>                          in-flight stagings
//! <root>/<repository>/<pid>.<counter>.<secs>.<name>   versioned content
//! <root>/<repository>/current.<name>                  symlink to the newest version
//! ```
//!
//! Writers never coordinate through locks: staging names embed the process
//! id and a process-wide monotonic counter, and publishing is a single
//! `rename`, atomic within the filesystem.

use crate::server::registry::{User, UserRegistry};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, DirBuilder, File, OpenOptions};
use tracing::{debug, warn};

/// Maximum accepted upload filename length, in bytes.
pub const MAX_FILENAME_LENGTH: usize = 128;

/// Check whether a name is safe to embed in a repository path.
///
/// The sole defense against directory traversal: no separators, no
/// wildcards, nothing outside `[A-Za-z0-9._%+-]`.
pub fn valid_filename(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'%' | b'+' | b'-'))
}

/// Guard for an on-disk staging file.
///
/// Unlinks the file when dropped, unless ownership was consumed by a
/// successful publish. This makes cleanup automatic on every connection
/// exit path.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget the file without unlinking it; called after a rename has
    /// already moved it out of `tmp/`.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to unlink staging file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// An upload in progress: the staging sink, its temp path, the target
/// filename, and the byte count of the block currently being received.
#[derive(Debug)]
pub struct StagedUpload {
    temp: TempFile,
    sink: File,
    filename: String,
    bytes_remaining: u64,
}

impl StagedUpload {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.bytes_remaining
    }

    /// Arm the block counter for an announced block.
    pub fn begin_block(&mut self, len: u64) {
        self.bytes_remaining = len;
    }

    /// Borrow the sink and the remaining-byte counter together, for the
    /// framer's block copy loop.
    pub fn block_io(&mut self) -> (&mut File, &mut u64) {
        (&mut self.sink, &mut self.bytes_remaining)
    }

    /// Tear the record apart for SAVE. The caller closes the sink and
    /// hands the temp file to [`RepositoryLayout::publish`].
    pub fn finish(self) -> (TempFile, File, String) {
        (self.temp, self.sink, self.filename)
    }
}

/// Path construction and durable promotion for user repositories.
#[derive(Debug)]
pub struct RepositoryLayout {
    root: PathBuf,
    upload_counter: AtomicU64,
}

impl RepositoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            upload_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `tmp/` and one directory per user repository.
    pub async fn bootstrap(&self, registry: &UserRegistry) -> io::Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(0o770);
        builder.create(self.root.join("tmp")).await?;
        for user in registry.users() {
            builder.create(self.root.join(&user.repository)).await?;
        }
        Ok(())
    }

    /// Open a staging file for an upload of `filename`.
    ///
    /// The file is write-only, mode 0640, created if absent. An existing
    /// file at the staging path is tolerated; the counter makes collisions
    /// improbable.
    pub async fn create_staging(&self, filename: &str) -> io::Result<StagedUpload> {
        let path = self
            .root
            .join("tmp")
            .join(format!("{}.{}", std::process::id(), self.next_counter()));

        let sink = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o640)
            .open(&path)
            .await?;

        debug!("staging upload of '{}' at {}", filename, path.display());

        Ok(StagedUpload {
            temp: TempFile::new(path),
            sink,
            filename: filename.to_string(),
            bytes_remaining: 0,
        })
    }

    /// Does `current.<filename>` name anything in the user's repository?
    ///
    /// Follows symlinks, so a dangling alias does not block a new upload.
    /// Unexpected stat errors count as "exists" and refuse the upload.
    pub async fn current_exists(&self, user: &User, filename: &str) -> bool {
        match fs::metadata(self.alias_path(user, filename)).await {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }

    /// Promote a staging file into the user's repository.
    ///
    /// The versioned name embeds the pid, a fresh counter value, and the
    /// wall-clock second, so concurrent publishes never collide. The rename
    /// is atomic within the filesystem.
    pub async fn publish(&self, temp: TempFile, user: &User, filename: &str) -> io::Result<PathBuf> {
        let versioned = self.root.join(&user.repository).join(format!(
            "{}.{}.{}.{}",
            std::process::id(),
            self.next_counter(),
            unix_seconds(),
            filename
        ));

        fs::rename(temp.path(), &versioned).await?;
        temp.disarm();
        Ok(versioned)
    }

    /// Repoint `current.<filename>` at a freshly published version.
    ///
    /// Remove-then-symlink is not atomic; readers may briefly observe a
    /// missing alias. The link target is relative to the repository
    /// directory so the tree can be relocated without dangling aliases.
    pub async fn update_current_alias(
        &self,
        user: &User,
        filename: &str,
        versioned: &Path,
    ) -> io::Result<()> {
        let alias = self.alias_path(user, filename);

        match fs::remove_file(&alias).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let target = versioned.file_name().unwrap_or(versioned.as_os_str());
        fs::symlink(target, &alias).await
    }

    fn alias_path(&self, user: &User, filename: &str) -> PathBuf {
        self.root
            .join(&user.repository)
            .join(format!("current.{}", filename))
    }

    fn next_counter(&self) -> u64 {
        self.upload_counter.fetch_add(1, Ordering::Relaxed)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
