use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use camino::Utf8Path;

use crate::files::ProjectFile;

/// An exclusive scratch directory for one task. Removed when closed or dropped.
pub struct Workspace {
    dir: tempfile::TempDir,
}

/// Join `relative` onto `root`, refusing absolute paths and `..` components
/// so nothing is written outside the workspace.
pub fn safe_join(root: &Path, relative: &Utf8Path) -> io::Result<PathBuf> {
    let rel = relative.as_std_path();
    let escapes = rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path escapes workspace: {relative}"),
        ));
    }
    Ok(root.join(rel))
}

impl Workspace {
    pub fn create(parent: &Path, prefix: &str) -> io::Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
        Ok(Workspace { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_of(&self, relative: &Utf8Path) -> io::Result<PathBuf> {
        safe_join(self.root(), relative)
    }

    /// Write `content` at `relative`, creating parent directories.
    pub fn write_file(&self, relative: &Utf8Path, content: &str) -> io::Result<PathBuf> {
        let target = self.path_of(relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(target)
    }

    /// Materialize every file at its project-relative path.
    pub fn populate<'a>(&self, files: impl IntoIterator<Item = &'a ProjectFile>) -> io::Result<()> {
        for file in files {
            self.write_file(&file.relative_path, &file.content)?;
        }
        Ok(())
    }

    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
