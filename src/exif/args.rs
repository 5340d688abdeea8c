//! Argument lists for exiftool operations.

use crate::error::{ExifBatchError, Result};
use std::path::Path;

/// Options for reading metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Keep filesystem tags (`FileSize`, `Directory`, ...) in the result.
    pub include_file_tags: bool,
    /// Ask for raw numeric values (`-n`) instead of print conversions.
    pub numeric: bool,
    /// Extra arguments passed before the file name.
    pub extra_args: Vec<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            include_file_tags: true,
            numeric: false,
            extra_args: Vec::new(),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn read_args(path: &Path, options: &ReadOptions) -> Vec<String> {
    let mut args = vec![
        "-json".to_string(),
        "-struct".to_string(),
        "-charset".to_string(),
        "filename=utf8".to_string(),
    ];
    if options.numeric {
        args.push("-n".to_string());
    }
    args.extend(options.extra_args.iter().cloned());
    args.push(path_arg(path));
    args
}

/// Tag names are letters, digits, `-`, `_` and an optional `Group:` prefix.
pub fn validate_tag_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(':')
        && !name.ends_with(':')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '#'));
    if valid {
        Ok(())
    } else {
        Err(ExifBatchError::InvalidArgument(format!("invalid tag name: {:?}", name)))
    }
}

/// `-TAG=VALUE` per tag; an empty value deletes the tag.
pub fn write_args(path: &Path, tags: &[(String, String)], overwrite_original: bool) -> Result<Vec<String>> {
    if tags.is_empty() {
        return Err(ExifBatchError::InvalidArgument("no tags to write".to_string()));
    }
    let mut args = Vec::with_capacity(tags.len() + 3);
    if overwrite_original {
        args.push("-overwrite_original".to_string());
    }
    for (name, value) in tags {
        validate_tag_name(name)?;
        args.push(format!("-{}={}", name, value));
    }
    args.push(path_arg(path));
    Ok(args)
}

/// Write one binary tag (e.g. `ThumbnailImage`) to `dest`.
pub fn extract_binary_args(path: &Path, tag: &str, dest: &Path) -> Result<Vec<String>> {
    validate_tag_name(tag)?;
    Ok(vec![
        "-b".to_string(),
        format!("-{}", tag),
        path_arg(path),
        "-W!".to_string(),
        path_arg(dest),
    ])
}

/// Copy `path` to `dest` with all metadata rebuilt from scratch.
pub fn rewrite_all_tags_args(path: &Path, dest: &Path) -> Vec<String> {
    vec![
        "-all=".to_string(),
        "-tagsfromfile".to_string(),
        "@".to_string(),
        "-all:all".to_string(),
        "-unsafe".to_string(),
        "-icc_profile".to_string(),
        path_arg(path),
        "-o".to_string(),
        path_arg(dest),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_args() {
        let args = read_args(Path::new("a.jpg"), &ReadOptions::default());
        assert_eq!(args.first().map(String::as_str), Some("-json"));
        assert_eq!(args.last().map(String::as_str), Some("a.jpg"));
        assert!(!args.contains(&"-n".to_string()));

        let numeric = ReadOptions {
            numeric: true,
            extra_args: vec!["-fast".into()],
            ..ReadOptions::default()
        };
        let args = read_args(Path::new("b.jpg"), &numeric);
        assert!(args.contains(&"-n".to_string()));
        assert!(args.contains(&"-fast".to_string()));
    }

    #[test]
    fn test_write_args() {
        let tags = vec![
            ("Artist".to_string(), "Jane".to_string()),
            ("XMP:Subject".to_string(), String::new()),
        ];
        let args = write_args(Path::new("c.jpg"), &tags, true).unwrap();
        assert_eq!(args, ["-overwrite_original", "-Artist=Jane", "-XMP:Subject=", "c.jpg"]);
    }

    #[test]
    fn test_write_rejects_bad_input() {
        assert!(write_args(Path::new("c.jpg"), &[], false).is_err());
        let bad = vec![("Bad Name".to_string(), "x".to_string())];
        assert!(matches!(
            write_args(Path::new("c.jpg"), &bad, false),
            Err(ExifBatchError::InvalidArgument(_))
        ));
        assert!(validate_tag_name("EXIF:").is_err());
        assert!(validate_tag_name("Orientation#").is_ok());
    }

    #[test]
    fn test_extract_and_rewrite_args() {
        let args = extract_binary_args(Path::new("in.jpg"), "ThumbnailImage", Path::new("t.jpg")).unwrap();
        assert_eq!(args, ["-b", "-ThumbnailImage", "in.jpg", "-W!", "t.jpg"]);
        let args = rewrite_all_tags_args(Path::new("in.jpg"), Path::new("out.jpg"));
        assert_eq!(args.last().map(String::as_str), Some("out.jpg"));
        assert_eq!(args[0], "-all=");
    }
}
