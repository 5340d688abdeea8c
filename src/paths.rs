//! Locating the exiftool executable.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the exiftool location.
pub const EXIFTOOL_ENV: &str = "EXIFBATCH_EXIFTOOL";

/// Executable name looked up on `PATH` when no override is set.
#[cfg(not(windows))]
pub const EXIFTOOL_BIN: &str = "exiftool";
#[cfg(windows)]
pub const EXIFTOOL_BIN: &str = "exiftool.exe";

/// Get the exiftool executable path.
///
/// Uses `EXIFBATCH_EXIFTOOL` if set (with `~` expanded), otherwise the first
/// `exiftool` found on `PATH`, otherwise the bare name so spawning reports a
/// useful error.
pub fn exiftool_path() -> PathBuf {
    if let Ok(path) = std::env::var(EXIFTOOL_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(Path::new(path.trim()));
    }
    find_on_path(EXIFTOOL_BIN).unwrap_or_else(|| PathBuf::from(EXIFTOOL_BIN))
}

/// Search `PATH` for an executable file with the given name.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Expands a leading `~` in a path to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (s, home) {
        ("~", Some(home)) => home,
        (s, Some(home)) if s.starts_with("~/") => home.join(&s[2..]),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn test_env_override_wins() {
        unsafe { std::env::set_var(EXIFTOOL_ENV, "/opt/exiftool/exiftool") };
        assert_eq!(exiftool_path(), PathBuf::from("/opt/exiftool/exiftool"));
        unsafe { std::env::remove_var(EXIFTOOL_ENV) };
    }

    #[test]
    #[serial(env)]
    fn test_blank_override_ignored() {
        unsafe { std::env::set_var(EXIFTOOL_ENV, "  ") };
        let path = exiftool_path();
        assert!(path.ends_with(EXIFTOOL_BIN));
        unsafe { std::env::remove_var(EXIFTOOL_ENV) };
    }

    #[test]
    fn test_find_on_path_locates_sh() {
        #[cfg(unix)]
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("definitely-not-a-real-binary-name").is_none());
    }

    #[test]
    #[serial(env)]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(
                expand_tilde(Path::new("~/bin/exiftool")),
                PathBuf::from(&home).join("bin/exiftool")
            );
        }
        assert_eq!(
            expand_tilde(Path::new("/usr/bin/exiftool")),
            PathBuf::from("/usr/bin/exiftool")
        );
    }
}
