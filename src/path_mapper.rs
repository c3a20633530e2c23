//! Deterministic mapping from original absolute paths to archive locations
//!
//! Every absolute path has exactly one place inside the archive:
//!
//! | Original path                  | Archive path                         |
//! |--------------------------------|--------------------------------------|
//! | `/root/<rel>`                  | `home_dirs/root/<rel>`               |
//! | `/home/<user>/<rel>`           | `home_dirs/<user>/<rel>`             |
//! | `<caller home>/<rel>`          | `home_dirs/<home basename>/<rel>`    |
//! | anything else, `/<rel>`        | `files/<rel>`                        |
//!
//! The mapping is only used to *construct* archive paths. Restore never
//! inverts it; the affiliation document is authoritative.
//!
//! ```rust
//! use ragnarok::path_mapper::map_path;
//! use ragnarok::Bucket;
//! use std::path::Path;
//!
//! let mapped = map_path(Path::new("/etc/nginx/nginx.conf"), Path::new("/home/alice")).unwrap();
//! assert_eq!(mapped.relative, "files/etc/nginx/nginx.conf");
//! assert_eq!(mapped.bucket, Bucket::Files);
//! ```

use crate::error::{RagnarokError, Result};
use crate::types::Bucket;
use std::path::{Component, Path};

/// Archive location of one original path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchivePath {
    /// `/`-separated path relative to the archive root, starting with the bucket
    pub relative: String,
    /// Top-level staging directory
    pub bucket: Bucket,
}

/// Maps absolute paths for one invoking user
#[derive(Debug, Clone)]
pub struct PathMapper {
    /// Normalized components of the caller's home (empty when unusable)
    home: Vec<String>,
}

impl PathMapper {
    /// Create a mapper for the given home directory
    ///
    /// A relative or non-UTF-8 home disables the home rule; `/root` and
    /// `/home/<user>` are still recognized.
    pub fn new(current_home: &Path) -> Self {
        let home = if current_home.is_absolute() {
            normalize(current_home).unwrap_or_default()
        } else {
            Vec::new()
        };
        Self { home }
    }

    /// Map an absolute path to its archive location
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::InvalidPath`] if the path is relative or not UTF-8
    pub fn map(&self, path: &Path) -> Result<ArchivePath> {
        if !path.is_absolute() {
            return Err(RagnarokError::invalid_path(path, "not an absolute path"));
        }
        let parts = normalize(path)
            .ok_or_else(|| RagnarokError::invalid_path(path, "path is not valid UTF-8"))?;

        let (bucket, prefix, rest): (Bucket, Vec<&str>, &[String]) = match parts.as_slice() {
            [first, rest @ ..] if first == "root" => (Bucket::HomeDirs, vec!["root"], rest),
            [first, user, rest @ ..] if first == "home" => {
                (Bucket::HomeDirs, vec![user.as_str()], rest)
            }
            _ if !self.home.is_empty() && parts.starts_with(&self.home) => {
                // Non-empty by the guard above
                let user = self.home[self.home.len() - 1].as_str();
                (Bucket::HomeDirs, vec![user], &parts[self.home.len()..])
            }
            _ => (Bucket::Files, Vec::new(), parts.as_slice()),
        };

        let mut relative = String::from(bucket.as_str());
        for segment in prefix.into_iter().chain(rest.iter().map(String::as_str)) {
            relative.push('/');
            relative.push_str(segment);
        }

        Ok(ArchivePath { relative, bucket })
    }
}

/// Map `path` for a caller whose home is `current_home`
pub fn map_path(path: &Path, current_home: &Path) -> Result<ArchivePath> {
    PathMapper::new(current_home).map(path)
}

/// Lexically normalize an absolute path into its normal components
///
/// `.` is dropped, `..` pops (and stops at the root), repeated and trailing
/// separators vanish. Returns `None` for non-UTF-8 components.
fn normalize(path: &Path) -> Option<Vec<String>> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => parts.push(segment.to_str()?.to_string()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn map(path: &str, home: &str) -> ArchivePath {
        map_path(Path::new(path), Path::new(home)).unwrap()
    }

    #[test]
    fn test_root_home() {
        let mapped = map("/root/.bashrc", "/home/alice");
        assert_eq!(mapped.relative, "home_dirs/root/.bashrc");
        assert_eq!(mapped.bucket, Bucket::HomeDirs);

        assert_eq!(map("/root", "/home/alice").relative, "home_dirs/root");
    }

    #[test]
    fn test_home_users() {
        assert_eq!(
            map("/home/bob/projects/notes.md", "/root").relative,
            "home_dirs/bob/projects/notes.md"
        );
        assert_eq!(map("/home/bob/", "/root").relative, "home_dirs/bob");
        assert_eq!(map("/home/bob", "/root").relative, "home_dirs/bob");
    }

    #[test]
    fn test_custom_home_outside_home_dir() {
        let mapped = map("/var/lib/builder/.config/app.toml", "/var/lib/builder");
        assert_eq!(mapped.relative, "home_dirs/builder/.config/app.toml");
        assert_eq!(mapped.bucket, Bucket::HomeDirs);
    }

    #[test]
    fn test_home_prefix_requires_component_boundary() {
        // "/var/lib/builder2" shares a string prefix with the home but is not under it
        let mapped = map("/var/lib/builder2/file", "/var/lib/builder");
        assert_eq!(mapped.relative, "files/var/lib/builder2/file");
        assert_eq!(mapped.bucket, Bucket::Files);
    }

    #[test]
    fn test_everything_else_goes_to_files() {
        let mapped = map("/etc/nginx/nginx.conf", "/home/alice");
        assert_eq!(mapped.relative, "files/etc/nginx/nginx.conf");
        assert_eq!(mapped.bucket, Bucket::Files);

        assert_eq!(map("/home", "/home/alice").relative, "files/home");
        assert_eq!(map("/rootfs/x", "/home/alice").relative, "files/rootfs/x");
        assert_eq!(map("/", "/home/alice").relative, "files");
    }

    #[test]
    fn test_lexical_normalization() {
        assert_eq!(
            map("/etc//nginx/./sites-enabled/", "/home/alice").relative,
            "files/etc/nginx/sites-enabled"
        );
        assert_eq!(map("/etc/../root/x", "/home/alice").relative, "home_dirs/root/x");
        assert_eq!(map("/../../etc", "/home/alice").relative, "files/etc");
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = map_path(Path::new("etc/hosts"), Path::new("/root")).unwrap_err();
        assert!(matches!(err, RagnarokError::InvalidPath { .. }));
    }

    #[test]
    fn test_relative_home_is_ignored() {
        let mapper = PathMapper::new(&PathBuf::from("relative/home"));
        assert_eq!(
            mapper.map(Path::new("/relative/home/x")).unwrap().relative,
            "files/relative/home/x"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/etc/\xff\xfe"));
        assert!(map_path(path, Path::new("/root")).is_err());
    }
}
