//! Resolves a source specifier into a local directory, either by cloning a remote
//! repository or copying a local tree.

use std::{fs, io, path::Path};

use log::debug;

use crate::{process, Result};

const REMOTE_SCHEMES: [&str; 4] = ["http://", "https://", "git://", "file://"];

/// A specifier with a known repository scheme is cloned; anything else is treated as a
/// local path.
pub fn is_remote(spec: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|scheme| spec.starts_with(scheme))
}

/// Fetches the application source into `target`. A clone failure is fatal to the run;
/// the returned error names the failing command and its exit code.
pub fn fetch(spec: &str, target: &Path) -> Result<()> {
    if is_remote(spec) {
        clone(spec, target)
    } else {
        copy_tree(Path::new(spec), target)
    }
}

fn clone(spec: &str, target: &Path) -> Result<()> {
    debug!("cloning {spec} into {target}", target = target.display());
    let output = process::command!("git", "clone", "--quiet", "--depth", "1", spec, target)
        .env("GIT_TERMINAL_PROMPT", "0")
        .try_output()?;
    if !output.status.success() {
        debug!(
            "git clone output:\n{stderr}",
            stderr = String::from_utf8_lossy(&output.stderr)
        );
    }
    output.require_success()?;
    Ok(())
}

/// Recursively copies `source` into `target`, which must not already exist. Refusing an
/// existing target keeps a stale tree from being silently merged into the build context.
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        return Err(format!(
            "refusing to copy {source} into existing directory {target}",
            source = source.display(),
            target = target.display()
        )
        .into());
    }
    if !source.is_dir() {
        return Err(format!(
            "source directory {source} does not exist or is not a directory",
            source = source.display()
        )
        .into());
    }
    debug!(
        "copying {source} into {target}",
        source = source.display(),
        target = target.display()
    );
    copy_dir_recursive(source, target)?;
    Ok(())
}

fn copy_dir_recursive(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_path;

    #[test]
    fn test_remote_specifier_detection() {
        assert!(is_remote("http://example.com/app.git"));
        assert!(is_remote("https://example.com/app.git"));
        assert!(is_remote("git://example.com/app.git"));
        assert!(is_remote("file:///srv/repos/app"));
        assert!(!is_remote("/srv/app-source"));
        assert!(!is_remote("relative/path"));
        assert!(!is_remote("gitlike-directory"));
    }

    #[test]
    fn test_copy_tree_preserves_structure() {
        let source = temp_path::tmp_dir_path("stoker-test-src-");
        fs::create_dir_all(source.join("static")).unwrap();
        fs::write(source.join("index.html"), "<html></html>").unwrap();
        fs::write(source.join("static").join("app.js"), "// app").unwrap();

        let target = temp_path::tmp_dir_path("stoker-test-dst-");
        fetch(source.to_str().unwrap(), &target).unwrap();

        assert_eq!(
            fs::read_to_string(target.join("index.html")).unwrap(),
            "<html></html>"
        );
        assert_eq!(
            fs::read_to_string(target.join("static").join("app.js")).unwrap(),
            "// app"
        );

        fs::remove_dir_all(&source).unwrap();
        fs::remove_dir_all(&target).unwrap();
    }

    #[test]
    fn test_copy_tree_refuses_existing_target() {
        let source = temp_path::tmp_dir_path("stoker-test-src-");
        fs::create_dir_all(&source).unwrap();
        let target = temp_path::tmp_dir_path("stoker-test-dst-");
        fs::create_dir_all(&target).unwrap();

        let result = fetch(source.to_str().unwrap(), &target);
        assert!(result.is_err());

        fs::remove_dir_all(&source).unwrap();
        fs::remove_dir_all(&target).unwrap();
    }

    #[test]
    fn test_copy_tree_requires_source_directory() {
        let source = temp_path::tmp_dir_path("stoker-test-missing-");
        let target = temp_path::tmp_dir_path("stoker-test-dst-");
        assert!(fetch(source.to_str().unwrap(), &target).is_err());
    }
}
