//! Base directories that configured experiment paths are resolved against.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsAccess {
    Home,
    Current,
}

impl FsAccess {
    fn base(&self) -> anyhow::Result<PathBuf> {
        let base_path = match self {
            FsAccess::Home => dirs::home_dir(),
            FsAccess::Current => std::env::current_dir().ok(),
        };
        base_path.ok_or_else(|| anyhow::anyhow!("Unable to determine the {:?} directory", self))
    }

    /// Resolves `path` against this base directory and creates it if missing.
    ///
    /// Absolute paths are kept as they are; a leading `~` is expanded to the
    /// home directory whatever the base.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<PathBuf> {
        let path = path.as_ref();
        let d = if path.is_absolute() {
            path.to_path_buf()
        } else if let Ok(rest) = path.strip_prefix("~") {
            FsAccess::Home.base()?.join(rest)
        } else {
            self.base()?.join(path)
        };
        create_directory(&d)?;
        Ok(d)
    }
}

fn create_directory(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Removes `dir` with everything in it, then recreates it empty.
pub fn rmrf_mkdir<P: AsRef<Path>>(dir: P) -> anyhow::Result<()> {
    let dir = dir.as_ref();
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Removes a file if it exists.
pub fn rm_file<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
