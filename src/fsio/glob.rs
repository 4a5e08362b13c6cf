//! Shell-style pattern expansion walked through the router.
//!
//! `glob(3)` cannot be borrowed here because expansion has to see virtual
//! drivers: every directory probe goes through the routed `opendir`/
//! `readdir`/`lstat` surface, so a module-provided tree participates in
//! wildcards exactly like the disk does.

use super::driver::{FsError, FsResult};
use super::Fsio;

impl Fsio {
    /// Expands `pattern` into the sorted list of matching paths.
    ///
    /// Supports `*`, `?` and `[...]` character classes (with ranges and
    /// `!` negation). A leading dot must be matched explicitly. No match
    /// is an empty list, not an error.
    pub async fn glob(&mut self, pattern: &str) -> FsResult<Vec<String>> {
        if pattern.is_empty() {
            return Err(FsError::Inval);
        }

        let absolute = pattern.starts_with('/');
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        let mut frontier: Vec<String> =
            vec![if absolute { "/".to_owned() } else { String::new() }];

        for segment in &segments {
            let mut next = Vec::new();

            if has_magic(segment) {
                for base in std::mem::take(&mut frontier) {
                    let dir = if base.is_empty() { ".".to_owned() } else { base.clone() };

                    let Ok(handle) = self.opendir(&dir).await else {
                        continue;
                    };

                    while let Ok(Some(entry)) = self.readdir(handle).await {
                        if fnmatch(segment, &entry.name) {
                            next.push(join_display(&base, &entry.name));
                        }
                    }

                    let _ = self.closedir(handle).await;
                }
            } else {
                for base in std::mem::take(&mut frontier) {
                    let candidate = join_display(&base, segment);
                    if self.lstat(&candidate).await.is_ok() {
                        next.push(candidate);
                    }
                }
            }

            frontier = next;

            if frontier.is_empty() {
                break;
            }
        }

        frontier.sort();
        Ok(frontier)
    }
}

fn has_magic(segment: &str) -> bool {
    segment.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

fn join_display(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_owned()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Matches one path component against one pattern component.
pub(super) fn fnmatch(pattern: &str, name: &str) -> bool {
    if name.starts_with('.') && !pattern.starts_with('.') {
        return false;
    }

    match_bytes(pattern.as_bytes(), name.as_bytes())
}

fn match_bytes(pat: &[u8], name: &[u8]) -> bool {
    match pat.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            // Greedy star: try every split point.
            for skip in 0..=name.len() {
                if match_bytes(rest, &name[skip..]) {
                    return true;
                }
            }
            false
        }
        Some((b'?', rest)) => match name.split_first() {
            Some((_, name_rest)) => match_bytes(rest, name_rest),
            None => false,
        },
        Some((b'[', rest)) => {
            let Some((matched, after_class)) = match_class(rest, name.first().copied()) else {
                // Unterminated class: treat '[' literally.
                return name.first() == Some(&b'[') && match_bytes(rest, &name[1..]);
            };

            match name.split_first() {
                Some((_, name_rest)) if matched => match_bytes(after_class, name_rest),
                _ => false,
            }
        }
        Some((&c, rest)) => match name.split_first() {
            Some((&n, name_rest)) if n == c => match_bytes(rest, name_rest),
            _ => false,
        },
    }
}

/// Evaluates a `[...]` class body against `candidate`. Returns whether it
/// matched and the pattern remainder past the closing bracket, or `None`
/// when the class never closes.
fn match_class(body: &[u8], candidate: Option<u8>) -> Option<(bool, &[u8])> {
    let (negated, body) = match body.split_first() {
        Some((b'!', rest)) | Some((b'^', rest)) => (true, rest),
        _ => (false, body),
    };

    let mut idx = 0;
    let mut matched = false;

    while idx < body.len() {
        let c = body[idx];

        if c == b']' && idx > 0 {
            let hit = matched != negated;
            return Some((candidate.is_some() && hit, &body[idx + 1..]));
        }

        if idx + 2 < body.len() && body[idx + 1] == b'-' && body[idx + 2] != b']' {
            if let Some(n) = candidate {
                if c <= n && n <= body[idx + 2] {
                    matched = true;
                }
            }
            idx += 3;
        } else {
            if candidate == Some(c) {
                matched = true;
            }
            idx += 1;
        }
    }

    None
}
