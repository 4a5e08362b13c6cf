//! Single-slot stat memoization.
//!
//! FTP command handlers stat the same path several times while servicing
//! one command; a most-recent-path slot absorbs the repeats. The slot
//! remembers the full outcome of the backing call, error included, so a
//! hit replays exactly what the driver reported. Mutating operations do
//! not invalidate it; staleness is bounded by the command granularity of
//! the surrounding server, which clears the cache between commands.

use super::driver::{FsResult, Stat};

#[derive(Debug, Default)]
pub(super) struct StatCache {
    slot: Option<(String, FsResult<Stat>)>,
}

impl StatCache {
    /// Replays the cached outcome for `path`, if it is the resident entry.
    pub(super) fn lookup(&self, path: &str) -> Option<FsResult<Stat>> {
        match &self.slot {
            Some((cached, res)) if cached == path => Some(*res),
            _ => None,
        }
    }

    pub(super) fn store(&mut self, path: &str, res: FsResult<Stat>) {
        self.slot = Some((path.to_owned(), res));
    }

    pub(super) fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsio::driver::{FileType, FsError};

    fn stat_of(ino: u64) -> Stat {
        Stat {
            file_type: FileType::Regular,
            mode: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 42,
            ino,
            dev: 1,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    #[test]
    fn hit_replays_success() {
        let mut cache = StatCache::default();
        cache.store("/a", Ok(stat_of(7)));

        let hit = cache.lookup("/a").expect("resident entry");
        assert_eq!(hit.unwrap().ino, 7);
        assert!(cache.lookup("/b").is_none());
    }

    #[test]
    fn hit_replays_error() {
        let mut cache = StatCache::default();
        cache.store("/missing", Err(FsError::NoEnt));

        let hit = cache.lookup("/missing").expect("resident entry");
        assert_eq!(hit.unwrap_err(), FsError::NoEnt);
    }

    #[test]
    fn newer_entry_evicts_older() {
        let mut cache = StatCache::default();
        cache.store("/a", Ok(stat_of(1)));
        cache.store("/b", Ok(stat_of(2)));

        assert!(cache.lookup("/a").is_none());
        assert!(cache.lookup("/b").is_some());
    }

    #[test]
    fn clear_empties_the_slot() {
        let mut cache = StatCache::default();
        cache.store("/a", Ok(stat_of(1)));
        cache.clear();
        assert!(cache.lookup("/a").is_none());
    }
}
