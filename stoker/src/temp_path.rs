use std::path::PathBuf;

/// Returns a uniquely named, not yet created path in the system temp directory.
pub fn tmp_dir_path(prefix: &str) -> PathBuf {
    use rand::distributions::{Alphanumeric, DistString};

    const LEN: usize = 16;

    let mut name = String::with_capacity(prefix.len() + LEN);
    name.push_str(prefix);
    Alphanumeric.append_string(&mut rand::thread_rng(), &mut name, LEN);
    std::env::temp_dir().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_unique() {
        let a = tmp_dir_path("stoker-");
        let b = tmp_dir_path("stoker-");
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("stoker-"));
    }
}
