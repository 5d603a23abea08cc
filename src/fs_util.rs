//! Path helpers (§6 "the core reads `HOME` to expand leading `~/`",
//! grounded on `cwFileSys.h`): tilde expansion, path decomposition, and the
//! versioned-filename scheme used by file-writing processors.

use std::path::{Path, PathBuf};

/// The `(dir, file_stem, ext)` decomposition of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts {
    pub dir: Option<PathBuf>,
    pub file_stem: String,
    pub ext: Option<String>,
}

/// Decomposes a path into directory, file stem, and extension.
pub fn path_parts(path: &Path) -> PathParts {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).map(|p| p.to_path_buf());
    let file_stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned());
    PathParts { dir, file_stem, ext }
}

/// Expands a leading `~/` against the `HOME` environment variable; paths
/// without that prefix (or when `HOME` is unset) are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Builds a directory/filename/extension triple, applying [`expand_home`]
/// to the directory.
pub fn make_fn(dir: &Path, name: &str, ext: &str) -> PathBuf {
    expand_home(dir).join(format!("{name}.{ext}"))
}

/// Appends an incrementing numeric suffix to `base` (before the extension)
/// until a non-colliding path is found on disk (§6 "a versioned filename:
/// base + incrementing suffix until non-colliding").
pub fn versioned_filename(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let parts = path_parts(base);
    let dir = parts.dir.unwrap_or_else(|| PathBuf::from("."));
    let mut n = 1u32;
    loop {
        let candidate = match &parts.ext {
            Some(ext) => dir.join(format!("{}-{n}.{ext}", parts.file_stem)),
            None => dir.join(format!("{}-{n}", parts.file_stem)),
        };
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parts_splits_dir_stem_extension() {
        let parts = path_parts(Path::new("/tmp/foo/bar.wav"));
        assert_eq!(parts.dir, Some(PathBuf::from("/tmp/foo")));
        assert_eq!(parts.file_stem, "bar");
        assert_eq!(parts.ext, Some("wav".into()));
    }

    #[test]
    fn expand_home_replaces_leading_tilde() {
        std::env::set_var("HOME", "/home/tester");
        let expanded = expand_home(Path::new("~/scores/a.csv"));
        assert_eq!(expanded, PathBuf::from("/home/tester/scores/a.csv"));
    }

    #[test]
    fn versioned_filename_is_unchanged_when_no_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("take.wav");
        assert_eq!(versioned_filename(&base), base);
    }

    #[test]
    fn versioned_filename_increments_past_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("take.wav");
        std::fs::write(&base, b"x").unwrap();
        std::fs::write(tmp.path().join("take-1.wav"), b"x").unwrap();
        let next = versioned_filename(&base);
        assert_eq!(next, tmp.path().join("take-2.wav"));
    }
}
