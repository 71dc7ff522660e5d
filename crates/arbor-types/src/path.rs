//! Slash-delimited absolute node paths.
//!
//! Paths are plain `String`s in normalized form: they start with `/`, never
//! end with `/` (except the root itself), and never contain empty segments.
//! These helpers keep every crate agreeing on that form.

use crate::error::TypeError;

/// Path separator.
pub const SEPARATOR: char = '/';

/// Path of the root node.
pub const ROOT: &str = "/";

/// Normalize an absolute path: collapse repeated separators, drop a trailing
/// separator, and reject relative paths or `.`/`..` segments.
pub fn normalize(path: &str) -> Result<String, TypeError> {
    let trimmed = path.trim();
    if !trimmed.starts_with(SEPARATOR) {
        return Err(TypeError::InvalidPath {
            path: path.to_string(),
            reason: "path must be absolute".into(),
        });
    }

    let mut out = String::with_capacity(trimmed.len());
    for segment in trimmed.split(SEPARATOR).filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(TypeError::InvalidPath {
                path: path.to_string(),
                reason: format!("segment '{segment}' is not allowed"),
            });
        }
        out.push(SEPARATOR);
        out.push_str(segment);
    }

    if out.is_empty() {
        out.push(SEPARATOR);
    }
    Ok(out)
}

/// Validate a single node name.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty()
        || name.trim() != name
        || name.contains(SEPARATOR)
        || name == "."
        || name == ".."
    {
        return Err(TypeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Join a normalized parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("{ROOT}{name}")
    } else {
        format!("{parent}{SEPARATOR}{name}")
    }
}

/// Parent path of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path (empty for the root).
pub fn name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Segments of a normalized path, root first.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Number of segments (root has depth 0).
pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// Returns `true` if `path` equals `ancestor` or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path.starts_with(SEPARATOR);
    }
    path == ancestor
        || (path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEPARATOR))
}

/// Returns `true` if `path` lies strictly beneath `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path != ancestor && is_within(path, ancestor)
}

/// Re-root `path` from `old_base` onto `new_base`.
///
/// Returns `None` when `path` is not within `old_base`.
pub fn rebase(path: &str, old_base: &str, new_base: &str) -> Option<String> {
    if !is_within(path, old_base) {
        return None;
    }
    let rest = if old_base == ROOT {
        &path[1..]
    } else {
        path[old_base.len()..].trim_start_matches(SEPARATOR)
    };
    if rest.is_empty() {
        Some(new_base.to_string())
    } else {
        Some(join(new_base, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("  /a  ").unwrap(), "/a");
    }

    #[test]
    fn normalize_rejects_relative_and_dots() {
        assert!(normalize("a/b").is_err());
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
    }

    #[test]
    fn validate_names() {
        assert!(validate_name("vdb1").is_ok());
        assert!(validate_name("with space").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(" padded").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn join_parent_name() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b"), "b");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn within_and_descendant() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(is_within("/x", "/"));
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/a", "/a"));
    }

    #[test]
    fn rebase_paths() {
        assert_eq!(rebase("/a/b/c", "/a", "/x").as_deref(), Some("/x/b/c"));
        assert_eq!(rebase("/a", "/a", "/x").as_deref(), Some("/x"));
        assert_eq!(rebase("/q", "/a", "/x"), None);
        assert_eq!(rebase("/q/r", "/", "/x").as_deref(), Some("/x/q/r"));
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/b/c"), 3);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(segs in proptest::collection::vec("[a-z0-9]{1,6}", 0..6)) {
            let raw = format!("/{}/", segs.join("//"));
            let once = normalize(&raw).unwrap();
            let twice = normalize(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(depth(&once), segs.len());
        }

        #[test]
        fn join_then_split(segs in proptest::collection::vec("[a-z0-9]{1,6}", 1..6)) {
            let mut path = ROOT.to_string();
            for s in &segs {
                path = join(&path, s);
            }
            prop_assert_eq!(name(&path), segs.last().unwrap().as_str());
            let parent_path = parent(&path).unwrap();
            prop_assert_eq!(depth(parent_path), segs.len() - 1);
            prop_assert!(is_descendant(&path, parent_path));
        }
    }
}
