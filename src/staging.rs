use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile, TempDir};

use crate::{Error, Result};

/// The staging file pair of one process-crossing invocation: a
/// before-image and an after-image in a staging root visible to the helper.
///
/// Files (and the root, when this invocation created it) are removed on
/// drop, so cleanup happens on success and on every failure path.
// Field order matters: the image files drop (and unlink) before the
// owned root directory does.
#[derive(Debug)]
pub(crate) struct Staging {
    before: NamedTempFile,
    after: NamedTempFile,
    root: PathBuf,
    owned_root: Option<TempDir>,
}

impl Staging {
    /// Create fresh image files under `configured_root`, or under a new
    /// private temporary directory when no root is configured.
    pub(crate) fn new(configured_root: Option<&Path>) -> Result<Self> {
        let (owned_root, root) = match configured_root {
            Some(path) => (None, path.to_path_buf()),
            None => {
                let dir =
                    tempfile::tempdir().map_err(|e| Error::transport_io("mkdtemp", e))?;
                let path = dir.path().to_path_buf();
                (Some(dir), path)
            }
        };

        let before = fresh_image(&root, ".before.json")?;
        let after = fresh_image(&root, ".after.json")?;

        Ok(Self {
            root,
            owned_root,
            before,
            after,
        })
    }

    pub(crate) fn root(&self) -> &Path {
        match &self.owned_root {
            Some(dir) => dir.path(),
            None => &self.root,
        }
    }

    pub(crate) fn before_path(&self) -> &Path {
        self.before.path()
    }

    pub(crate) fn after_path(&self) -> &Path {
        self.after.path()
    }
}

fn fresh_image(root: &Path, suffix: &str) -> Result<NamedTempFile> {
    let file = Builder::new()
        .prefix("delegate-")
        .suffix(suffix)
        .tempfile_in(root)
        .map_err(|e| {
            Error::transport(
                "mkstemp",
                format!("cannot create image file in {}: {}", root.display(), e),
            )
        })?;

    // The helper may run as a different user (sudo); mode bits alone are
    // not sufficient there (see the ACL step in the sudo delegate), but
    // they are necessary.
    let mut permissions = file
        .as_file()
        .metadata()
        .map_err(|e| Error::transport_io("stat", e))?
        .permissions();
    permissions.set_mode(0o666);
    file.as_file()
        .set_permissions(permissions)
        .map_err(|e| Error::transport_io("chmod", e))?;

    Ok(file)
}
