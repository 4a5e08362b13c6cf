//! Pure path manipulation: concatenation, dot-segment collapse, and the
//! lexical half of tilde expansion.
//!
//! Nothing here touches the filesystem; the resolver layers symlink and
//! existence semantics on top.

use super::driver::MAX_PATH_LEN;

/// Concatenates two directory fragments.
///
/// Overlong results collapse to `"/"` rather than truncating silently. An
/// absolute second component wins outright, mirroring how FTP arguments
/// override the working directory.
pub fn dircat(dir1: &str, dir2: &str) -> String {
    if dir1.len() + dir2.len() + 1 > MAX_PATH_LEN {
        return "/".to_owned();
    }

    if dir2.starts_with('/') {
        return dir2.to_owned();
    }

    let mut out = String::with_capacity(dir1.len() + dir2.len() + 1);
    out.push_str(dir1);

    if !out.is_empty() && !out.ends_with('/') {
        out.push('/');
    }

    out.push_str(dir2);

    if out.is_empty() {
        out.push('/');
    }

    out
}

/// Collapses `.`, `..`, `./` and `../` segments lexically.
///
/// The result is always absolute: a relative input is interpreted against
/// an empty base, so `clean_path("a/b")` is `"/a/b"`. `..` pops the last
/// segment of the work buffer; popping past the root is a no-op. The empty
/// result becomes `"/"`.
pub fn clean_path(path: &str) -> String {
    clean_into(String::new(), path)
}

/// Collapses `path` on top of an already-clean `work` base.
pub(super) fn clean_into(mut work: String, path: &str) -> String {
    if work == "/" {
        work.clear();
    }

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => pop_segment(&mut work),
            _ => {
                work.push('/');
                work.push_str(segment);
            }
        }
    }

    if work.is_empty() {
        work.push('/');
    }

    work
}

/// Removes the last `/`-delimited segment of `work`, if any.
pub(super) fn pop_segment(work: &mut String) {
    match work.rfind('/') {
        Some(idx) => work.truncate(idx),
        None => work.clear(),
    }
}

/// Splits a tilde path into its user part and the remaining tail.
///
/// `"~"` yields `("", None)`, `"~ftp"` yields `("ftp", None)`, and
/// `"~ftp/pub"` yields `("ftp", Some("pub"))`. Callers substitute the
/// session user for an empty user part.
pub(super) fn split_tilde(path: &str) -> (&str, Option<&str>) {
    debug_assert!(path.starts_with('~'));

    match path.find('/') {
        Some(idx) => (&path[1..idx], Some(&path[idx + 1..])),
        None => (&path[1..], None),
    }
}

/// Joins a home directory and the tail of a tilde path.
pub(super) fn join_home(home: &str, tail: Option<&str>) -> String {
    let mut out = home.to_owned();

    if let Some(tail) = tail {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(tail);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dircat_joins_with_separator() {
        assert_eq!(dircat("/srv", "pub"), "/srv/pub");
        assert_eq!(dircat("/srv/", "pub"), "/srv/pub");
        assert_eq!(dircat("/", "pub"), "/pub");
    }

    #[test]
    fn dircat_absolute_second_wins() {
        assert_eq!(dircat("/srv", "/etc/motd"), "/etc/motd");
    }

    #[test]
    fn dircat_overflow_collapses_to_root() {
        let long = "x".repeat(MAX_PATH_LEN);
        assert_eq!(dircat(&long, "y"), "/");
        assert_eq!(dircat("/a", &long), "/");
    }

    #[test]
    fn dircat_result_is_absolute_iff_either_part_is() {
        assert!(dircat("/a", "b").starts_with('/'));
        assert!(dircat("a", "/b").starts_with('/'));
        assert!(!dircat("a", "b").starts_with('/'));
    }

    #[test]
    fn clean_collapses_dot_segments() {
        assert_eq!(clean_path("/a/./b"), "/a/b");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
        assert_eq!(clean_path("/a//b/"), "/a/b");
        assert_eq!(clean_path("/../.."), "/");
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("a/b"), "/a/b");
    }

    #[test]
    fn clean_is_idempotent() {
        for path in [
            "/a/./b/../c//d/",
            "relative/../x",
            "/..",
            "/a/b/c",
            "////",
            "/trailing/..",
            "a/.././../b",
        ] {
            let once = clean_path(path);
            assert_eq!(clean_path(&once), once, "not idempotent for {path:?}");
        }
    }

    #[test]
    fn tilde_split() {
        assert_eq!(split_tilde("~"), ("", None));
        assert_eq!(split_tilde("~ftp"), ("ftp", None));
        assert_eq!(split_tilde("~ftp/pub/x"), ("ftp", Some("pub/x")));
        assert_eq!(split_tilde("~/pub"), ("", Some("pub")));
    }

    #[test]
    fn join_home_handles_trailing_slash() {
        assert_eq!(join_home("/home/ftp", Some("pub")), "/home/ftp/pub");
        assert_eq!(join_home("/home/ftp/", Some("pub")), "/home/ftp/pub");
        assert_eq!(join_home("/home/ftp", None), "/home/ftp");
    }
}
