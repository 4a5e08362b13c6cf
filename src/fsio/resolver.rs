//! Path canonicalization with symlink chasing.
//!
//! Two flavors: [`Fsio::resolve_path`] requires every component to exist,
//! while [`Fsio::resolve_partial`] tolerates a missing terminal component,
//! which is what `STOR` and friends need when the target does not exist
//! yet. Interior symlinks are expanded exactly once per encounter via
//! `lstat`, with an inode-repeat check and a 32-hop bound guarding cycles.

use super::driver::{FsError, FsResult};
use super::path::{clean_into, pop_segment};
use super::{Fsio, Interpolated, StatKind};

const MAX_LINK_HOPS: u32 = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ResolveMode {
    /// Every component must exist.
    Full,
    /// A missing terminal component is accepted as-is.
    Partial,
}

impl Fsio {
    /// Canonicalizes `p`, requiring the whole path to exist.
    pub async fn resolve_path(&mut self, p: &str) -> FsResult<String> {
        self.resolve(p, ResolveMode::Full).await
    }

    /// Canonicalizes `p`, accepting a missing final component.
    pub async fn resolve_partial(&mut self, p: &str) -> FsResult<String> {
        self.resolve(p, ResolveMode::Partial).await
    }

    async fn resolve(&mut self, p: &str, mode: ResolveMode) -> FsResult<String> {
        if p.is_empty() {
            return Err(FsError::Inval);
        }

        let mut work = String::new();
        let mut curpath;

        if p.starts_with('/') {
            curpath = p.to_owned();
        } else {
            match self.interpolate(p).await? {
                Interpolated::Expanded(expanded) => {
                    curpath = expanded;
                    if !curpath.starts_with('/') {
                        work = self.cwd.clone();
                    }
                }
                Interpolated::Verbatim(verbatim) => {
                    curpath = verbatim;
                    work = self.cwd.clone();
                }
            }
        }

        let mut link_cnt: u32 = 0;
        let mut last_inode: u64 = 0;

        'restart: loop {
            let mut rest = curpath.as_str();

            while !rest.is_empty() {
                match rest {
                    "." => break,
                    ".." => {
                        pop_segment(&mut work);
                        break;
                    }
                    _ => {}
                }

                if let Some(r) = rest.strip_prefix("./") {
                    rest = r;
                    continue;
                }

                if let Some(r) = rest.strip_prefix("../") {
                    pop_segment(&mut work);
                    rest = r;
                    continue;
                }

                let (seg, tail) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                    None => (rest, ""),
                };
                rest = tail;

                if seg.is_empty() {
                    continue;
                }

                let mut namebuf = work.clone();
                if !namebuf.ends_with('/') {
                    namebuf.push('/');
                }
                namebuf.push_str(seg);

                let fs = self.lookup_dir(&namebuf, false);

                let st = match self.cache_stat(&fs, &namebuf, StatKind::Lstat).await {
                    Ok(st) => st,
                    Err(_) if mode == ResolveMode::Partial && rest.is_empty() => {
                        // Missing terminal component; accept what we have.
                        work = namebuf;
                        break 'restart;
                    }
                    Err(_) => return Err(FsError::NoEnt),
                };

                if st.is_symlink() {
                    if st.ino != 0 && st.ino == last_inode {
                        return Err(FsError::Loop);
                    }
                    last_inode = st.ino;

                    link_cnt += 1;
                    if link_cnt > MAX_LINK_HOPS {
                        return Err(FsError::Loop);
                    }

                    let mut linkpath =
                        fs.readlink(&namebuf).await.map_err(|_| FsError::NoEnt)?;
                    if linkpath.is_empty() {
                        return Err(FsError::NoEnt);
                    }

                    if linkpath.starts_with('/') {
                        work.clear();
                    }

                    if linkpath.starts_with('~') {
                        work.clear();
                        linkpath = self.interpolate(&linkpath).await?.into_string();
                    }

                    if !rest.is_empty() {
                        linkpath.push('/');
                        linkpath.push_str(rest);
                    }

                    curpath = linkpath;
                    continue 'restart;
                }

                if st.is_dir() {
                    work = namebuf;
                    continue;
                }

                // Regular file (or other non-directory leaf).
                if !rest.is_empty() {
                    return Err(FsError::NoEnt);
                }

                work = namebuf;
            }

            break;
        }

        if work.is_empty() {
            work.push('/');
        }

        Ok(work)
    }

    /// Canonicalizes `p` lexically against the virtual working directory,
    /// without touching symlinks. Keeps the shape the user typed, which is
    /// what hides symlink targets from `PWD` output.
    pub async fn virtual_path(&mut self, p: &str) -> FsResult<String> {
        let interpolated = self.interpolate(p).await?.into_string();

        let base = if interpolated.starts_with('/') {
            String::new()
        } else {
            self.vwd.clone()
        };

        Ok(clean_into(base, &interpolated))
    }
}
