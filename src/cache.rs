use anyhow::{Context, Result};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const PLAYWRIGHT_CACHE: &str = ".cache/ms-playwright";
pub const HUGGINGFACE_CACHE: &str = ".cache/huggingface/hub";

/// `mkdir -p`
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))
}

/// Moves the directory `source` into `dest_parent`, keeping its file name.
///
/// A missing source is not an error. An empty directory already at the destination is
/// replaced; a non-empty one makes the move fail. Returns the new location when something moved.
pub fn relocate(source: &Path, dest_parent: &Path) -> Result<Option<PathBuf>> {
    if !source.is_dir() {
        debug!(source = %source.display(), "nothing to relocate");
        return Ok(None);
    }

    let name = source
        .file_name()
        .with_context(|| format!("Cannot relocate {}: no file name", source.display()))?;
    let dest = dest_parent.join(name);

    ensure_dir(dest_parent)?;
    if dest.is_dir() && is_empty_dir(&dest)? {
        fs::remove_dir(&dest).with_context(|| format!("Failed to replace {}", dest.display()))?;
    }

    match fs::rename(source, &dest) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            copy_tree(source, &dest)?;
            fs::remove_dir_all(source)
                .with_context(|| format!("Failed to remove {}", source.display()))?;
        }
        Err(error) => {
            return Err(error).with_context(|| {
                format!("Failed to move {} to {}", source.display(), dest.display())
            });
        }
    }

    info!(from = %source.display(), to = %dest.display(), "relocated cache");
    Ok(Some(dest))
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(entries.next().is_none())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(source)
        .with_context(|| format!("Failed to stat {}", source.display()))?;

    if metadata.is_symlink() {
        let target = fs::read_link(source)?;
        std::os::unix::fs::symlink(&target, dest)
            .with_context(|| format!("Failed to link {}", dest.display()))?;
    } else if metadata.is_dir() {
        ensure_dir(dest)?;
        fs::set_permissions(dest, metadata.permissions())?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        fs::copy(source, dest).with_context(|| {
            format!("Failed to copy {} to {}", source.display(), dest.display())
        })?;
    }

    Ok(())
}
