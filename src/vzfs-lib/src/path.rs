//! Canonical path handling.
//!
//! Paths accept only `[A-Za-z0-9_/.-]`. Canonical directory paths end in
//! `/`, canonical leaf paths never do, and the root is `"/"`. `normalize`
//! is idempotent on its own absolute output.

use crate::{VzfsError, VzfsResult};

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | '-')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Validate a single path segment used as an entity name.
pub fn validate_name(name: &str) -> VzfsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(VzfsError::InvalidPath(format!("invalid name: {:?}", name)));
    }
    if let Some(bad) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(VzfsError::InvalidPath(format!(
            "invalid character {:?} in name {:?}",
            bad, name
        )));
    }
    Ok(())
}

/// Turn a `(cwd, input)` pair into a canonical absolute path.
///
/// `cwd_pieces` is the split form of the current directory as produced by
/// [`abs_path_to_pieces`]; it seeds the fold for relative inputs and is
/// ignored for absolute ones. A trailing `/` on the result marks a
/// directory.
pub fn normalize(input: &str, cwd_pieces: &[String]) -> VzfsResult<String> {
    if input.is_empty() {
        return Err(VzfsError::InvalidPath("empty path".to_string()));
    }
    if input == "/.." {
        return Err(VzfsError::InvalidPath("path escapes root: /..".to_string()));
    }
    if let Some(bad) = input.chars().find(|c| !is_path_char(*c)) {
        return Err(VzfsError::InvalidPath(format!(
            "invalid character {:?} in path {:?}",
            bad, input
        )));
    }

    let mut owned = input.to_string();
    if owned.ends_with("/..") {
        // Force the parent reference to be folded as a segment.
        owned.push('/');
    } else if owned.ends_with("/.") {
        // "/a/." means the directory itself: keep the trailing slash.
        owned.truncate(owned.len() - 1);
    }

    // Split, collapsing runs of interior empty segments to a single one.
    // The leading empty (absolute marker) and the trailing empty
    // (directory marker) stay intact.
    let raw: Vec<&str> = owned.split('/').collect();
    let mut segments: Vec<&str> = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().copied().enumerate() {
        if seg.is_empty()
            && i != 0
            && i != raw.len() - 1
            && segments.last().is_some_and(|s| s.is_empty())
        {
            continue;
        }
        segments.push(seg);
    }

    let absolute = segments.first().is_some_and(|s| s.is_empty());
    let mut pieces: Vec<String> = if absolute {
        vec![String::new()]
    } else {
        cwd_pieces.to_vec()
    };

    let last = segments.len() - 1;
    let start = if absolute { 1 } else { 0 };
    for (i, seg) in segments.iter().enumerate().skip(start) {
        match *seg {
            "." => {}
            ".." => {
                // Refuse to pop past the root marker.
                if pieces.len() > 1 {
                    pieces.pop();
                }
            }
            "" => {
                if i == last {
                    pieces.push(String::new());
                }
            }
            other => pieces.push(other.to_string()),
        }
    }

    if pieces.is_empty() {
        return Err(VzfsError::InvalidPath(format!(
            "path {:?} normalizes to nothing",
            input
        )));
    }
    if pieces.len() == 1 {
        return Ok(format!("/{}", pieces[0]));
    }
    Ok(pieces.join("/"))
}

/// Inverse of the split performed by [`normalize`]: turns a canonical
/// absolute path into the pieces that seed `cwd_pieces`. The root `/`
/// becomes `[""]`.
pub fn abs_path_to_pieces(path: &str) -> Vec<String> {
    let mut pieces: Vec<String> = path.split('/').map(str::to_string).collect();
    while pieces.len() > 1 && pieces.last().is_some_and(|s| s.is_empty()) {
        pieces.pop();
    }
    pieces
}

/// Longest common leading substring of two canonical paths. Used as the
/// lock prefix when one operation spans two subtrees.
pub fn greatest_common_prefix(a: &str, b: &str) -> String {
    let len = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    a[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces(path: &str) -> Vec<String> {
        abs_path_to_pieces(path)
    }

    #[test]
    fn test_rejects_empty_and_root_escape() {
        assert!(normalize("", &pieces("/")).is_err());
        assert!(normalize("/..", &pieces("/")).is_err());
    }

    #[test]
    fn test_rejects_illegal_characters() {
        assert!(normalize("/a b", &pieces("/")).is_err());
        assert!(normalize("/a\u{ffff}", &pieces("/")).is_err());
        assert!(normalize("/ä", &pieces("/")).is_err());
    }

    #[test]
    fn test_absolute_paths() {
        let cwd = pieces("/x/y/");
        assert_eq!(normalize("/", &cwd).unwrap(), "/");
        assert_eq!(normalize("/a", &cwd).unwrap(), "/a");
        assert_eq!(normalize("/a/", &cwd).unwrap(), "/a/");
        assert_eq!(normalize("/a/b", &cwd).unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/", &cwd).unwrap(), "/a/b/");
    }

    #[test]
    fn test_relative_paths() {
        let cwd = pieces("/a/b/");
        assert_eq!(normalize("c", &cwd).unwrap(), "/a/b/c");
        assert_eq!(normalize("c/", &cwd).unwrap(), "/a/b/c/");
        assert_eq!(normalize(".", &cwd).unwrap(), "/a/b/");
        assert_eq!(normalize("..", &cwd).unwrap(), "/a/");
        assert_eq!(normalize("../c", &cwd).unwrap(), "/a/c");
    }

    #[test]
    fn test_dot_handling() {
        let cwd = pieces("/");
        assert_eq!(normalize("/.", &cwd).unwrap(), "/");
        assert_eq!(normalize("/a/.", &cwd).unwrap(), "/a/");
        assert_eq!(normalize("/a/./b", &cwd).unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/..", &cwd).unwrap(), "/a/");
        assert_eq!(normalize("/a/b/../", &cwd).unwrap(), "/a/");
        assert_eq!(normalize("/a/b/../c", &cwd).unwrap(), "/a/c");
    }

    #[test]
    fn test_cwd_dot_resolves_to_cwd() {
        assert_eq!(normalize(".", &pieces("/")).unwrap(), "/");
    }

    #[test]
    fn test_dotdot_clamps_at_root() {
        // Only the literal "/.." is rejected; folded parent references
        // clamp at the root instead of escaping it.
        assert_eq!(normalize("/a/../..", &pieces("/")).unwrap(), "/");
        assert_eq!(normalize("..", &pieces("/")).unwrap(), "/");
    }

    #[test]
    fn test_interior_empty_segments_collapse() {
        let cwd = pieces("/");
        assert_eq!(normalize("/a//b", &cwd).unwrap(), "/a/b");
        assert_eq!(normalize("/a///b/", &cwd).unwrap(), "/a/b/");
        assert_eq!(normalize("//", &cwd).unwrap(), "/");
    }

    #[test]
    fn test_idempotent_on_canonical_output() {
        let cwd = pieces("/x/");
        for input in ["/a/b/../c/", "d/e", ".", "/a//b"] {
            let once = normalize(input, &cwd).unwrap();
            let twice = normalize(&once, &cwd).unwrap();
            assert_eq!(once, twice, "input {:?}", input);
        }
    }

    #[test]
    fn test_abs_path_to_pieces() {
        assert_eq!(abs_path_to_pieces("/"), vec!["".to_string()]);
        assert_eq!(abs_path_to_pieces("/a/b"), vec!["", "a", "b"]);
        assert_eq!(abs_path_to_pieces("/a/b/"), vec!["", "a", "b"]);
    }

    #[test]
    fn test_greatest_common_prefix() {
        assert_eq!(greatest_common_prefix("/a/x", "/a/y"), "/a/");
        assert_eq!(greatest_common_prefix("/a/x", "/b/"), "/");
        assert_eq!(greatest_common_prefix("/a/", "/a/"), "/a/");
        assert_eq!(greatest_common_prefix("/ab", "/abc"), "/ab");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("test.txt").is_ok());
        assert!(validate_name("a-b_c.9").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a b").is_err());
    }
}
