//! Path helpers for vault-relative paths.
//!
//! Vault paths are absolute, forward-slash separated, and never end in a
//! slash (except the root `/`).

/// Convert OS separators to forward slashes.
pub fn tonix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize to an absolute vault path: forward slashes, leading `/`, no
/// empty or `.` segments, `..` resolved, no trailing slash.
pub fn normalize(path: &str) -> String {
    let unix = tonix(path);
    let mut segments: Vec<&str> = Vec::new();
    for segment in unix.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Join a child name onto a vault path.
pub fn join(base: &str, name: &str) -> String {
    normalize(&format!("{}/{}", base, name))
}

/// Parent of a vault path. The root is its own parent.
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

/// Last segment of a vault path (empty for the root).
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Whether `path` equals `ancestor` or lies beneath it on a segment boundary.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Whether every character is allowed in a vault path: ASCII letters and
/// digits, whitespace, `/`, and URL-safe punctuation.
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || c.is_whitespace()
                || "-._~!$&'()*+,;=:@/".contains(c)
        })
}

/// Trimmed form used as a storage key (`a/b`, root is empty).
pub(crate) fn key(path: &str) -> String {
    normalize(path).trim_start_matches('/').to_string()
}

/// Undo the duplicated leading segment some Windows watch backends report.
///
/// The OS can echo the tail of the watched directory's name into the
/// reported path (`/vault/a.txt` while watching `C:\...\vault`).
pub fn fix_reported_path(path: &str, base: &str) -> String {
    if cfg!(windows) {
        strip_echoed_parent(path, base)
    } else {
        path.to_string()
    }
}

pub(crate) fn strip_echoed_parent(path: &str, base: &str) -> String {
    let Some(second_slash) = path.get(1..).and_then(|rest| rest.find('/')).map(|i| i + 1) else {
        return path.to_string();
    };
    let first_segment = &path[1..second_slash];
    let base = tonix(base);
    if !first_segment.is_empty() && base.trim_end_matches('/').ends_with(first_segment) {
        path[second_slash..].to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("foo"), "/foo");
        assert_eq!(normalize("/foo/"), "/foo");
        assert_eq!(normalize("\\sub\\dir\\a.txt"), "/sub/dir/a.txt");
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("//"), "/");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(file_name("/a/b.txt"), "b.txt");
        assert_eq!(file_name("/"), "");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_is_within_respects_segment_boundary() {
        assert!(is_within("/subdir", "/subdir"));
        assert!(is_within("/subdir/a.txt", "/subdir"));
        assert!(!is_within("/subdirectory", "/subdir"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn test_is_valid_path() {
        assert!(is_valid_path("/notes/my file (1).txt"));
        assert!(is_valid_path("/a-b_c~d@e"));
        assert!(!is_valid_path("/a<b>.txt"));
        assert!(!is_valid_path("/caf\u{e9}"));
        assert!(!is_valid_path(""));
    }

    #[test]
    fn test_key() {
        assert_eq!(key("/a/b"), "a/b");
        assert_eq!(key("/"), "");
    }

    #[test]
    fn test_strip_echoed_parent() {
        assert_eq!(strip_echoed_parent("/vault/a.txt", "C:/tmp/vault"), "/a.txt");
        assert_eq!(strip_echoed_parent("/vault/a.txt", "C:\\tmp\\vault\\"), "/a.txt");
        assert_eq!(strip_echoed_parent("/sub/a.txt", "C:/tmp/vault"), "/sub/a.txt");
        assert_eq!(strip_echoed_parent("/a.txt", "C:/tmp/vault"), "/a.txt");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_fix_reported_path_is_identity_off_windows() {
        assert_eq!(fix_reported_path("/vault/a.txt", "/tmp/vault"), "/vault/a.txt");
    }
}
