//! The build context: a local staging directory holding the application source, any
//! extracted artifacts, and the generated Dockerfile, uploaded to the daemon as a tar
//! archive.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::warn;

use crate::temp_path;

/// Temp-allocated contexts are removed when dropped, on success and failure alike. A
/// caller-supplied working directory is left in place for inspection.
pub struct BuildContext {
    dir: PathBuf,
    owned: bool,
}

impl BuildContext {
    pub fn create(working_dir: Option<&Path>) -> io::Result<Self> {
        match working_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Ok(Self {
                    dir: dir.to_owned(),
                    owned: false,
                })
            }
            None => {
                let dir = temp_path::tmp_dir_path("stoker-");
                fs::create_dir_all(&dir)?;
                Ok(Self { dir, owned: true })
            }
        }
    }

    /// A context nested inside this one, used for the runtime pass of an extended
    /// build. It is cleaned up with its parent.
    pub fn create_nested(&self, name: &str) -> io::Result<Self> {
        let dir = self.dir.join(name);
        fs::create_dir(&dir)?;
        Ok(Self { dir, owned: false })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn src_dir(&self) -> PathBuf {
        self.dir.join("src")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    /// Serializes the context directory into the tar archive the daemon's build
    /// endpoint consumes.
    pub fn tar_bytes(&self) -> io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &self.dir)?;
        builder.into_inner()
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(error) = fs::remove_dir_all(&self.dir) {
            // Idempotent: an already-removed context is not worth reporting.
            if error.kind() != io::ErrorKind::NotFound {
                warn!(
                    "failed to remove build context {dir}: {error}",
                    dir = self.dir.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_context_removed_on_drop() {
        let context = BuildContext::create(None).unwrap();
        let dir = context.dir().to_owned();
        assert!(dir.is_dir());
        drop(context);
        assert!(!dir.exists());
    }

    #[test]
    fn test_caller_supplied_directory_is_kept() {
        let dir = temp_path::tmp_dir_path("stoker-test-ctx-");
        let context = BuildContext::create(Some(&dir)).unwrap();
        assert!(context.dir().is_dir());
        drop(context);
        assert!(dir.is_dir());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_nested_context_lives_inside_parent() {
        let parent = BuildContext::create(None).unwrap();
        let nested = parent.create_nested("runtime").unwrap();
        assert_eq!(nested.dir(), parent.dir().join("runtime"));
        fs::create_dir(nested.src_dir()).unwrap();
        drop(nested);
        // The nested directory is owned by the parent, not its own guard.
        assert!(parent.dir().join("runtime").is_dir());
        let dir = parent.dir().to_owned();
        drop(parent);
        assert!(!dir.exists());
    }

    #[test]
    fn test_tar_bytes_contains_context_files() {
        let context = BuildContext::create(None).unwrap();
        fs::write(context.dir().join("Dockerfile"), "FROM base\n").unwrap();
        fs::create_dir(context.src_dir()).unwrap();
        fs::write(context.src_dir().join("index.html"), "<html></html>").unwrap();

        let bytes = context.tar_bytes().unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert!(names.iter().any(|name| name.ends_with("Dockerfile")));
        assert!(names.iter().any(|name| name.ends_with("index.html")));
    }
}
