//! Registry of open directory iterators.
//!
//! `opendir` hands callers an opaque handle; `readdir` and `closedir`
//! recover the iterator and the driver that produced it from this map.
//! The driver reference is held for as long as the iterator lives, so an
//! unregistered driver with open iterators stays usable until the last
//! `closedir`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::driver::{DirIter, FsDriver};

/// Opaque handle naming an open directory iterator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DirHandle(u64);

pub(super) struct OpenDirEntry {
    pub(super) driver: Arc<dyn FsDriver>,
    pub(super) iter: Mutex<Box<dyn DirIter>>,
}

#[derive(Default)]
pub(super) struct OpenDirs {
    map: DashMap<u64, Arc<OpenDirEntry>>,
    next: AtomicU64,
}

impl OpenDirs {
    pub(super) fn insert(
        &self,
        driver: Arc<dyn FsDriver>,
        iter: Box<dyn DirIter>,
    ) -> DirHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(OpenDirEntry { driver, iter: Mutex::new(iter) });
        self.map.insert(id, entry);
        DirHandle(id)
    }

    pub(super) fn get(&self, handle: DirHandle) -> Option<Arc<OpenDirEntry>> {
        self.map.get(&handle.0).map(|e| Arc::clone(e.value()))
    }

    pub(super) fn remove(&self, handle: DirHandle) -> Option<Arc<OpenDirEntry>> {
        self.map.remove(&handle.0).map(|(_, e)| e)
    }

    pub(super) fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsio::driver::{DirEnt, FsResult};
    use async_trait::async_trait;

    struct Nop;

    impl FsDriver for Nop {
        fn name(&self) -> &str {
            "nop"
        }
    }

    struct Counted(u32);

    #[async_trait]
    impl DirIter for Counted {
        async fn readdir(&mut self) -> FsResult<Option<DirEnt>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(DirEnt { name: format!("e{}", self.0), file_type: None }))
        }

        async fn closedir(&mut self) -> FsResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn handles_are_distinct_and_removable() {
        let dirs = OpenDirs::default();
        let driver: Arc<dyn FsDriver> = Arc::new(Nop);

        let h1 = dirs.insert(Arc::clone(&driver), Box::new(Counted(1)));
        let h2 = dirs.insert(Arc::clone(&driver), Box::new(Counted(2)));
        assert_ne!(h1, h2);
        assert_eq!(dirs.len(), 2);

        let entry = dirs.get(h2).unwrap();
        let ent = entry.iter.lock().await.readdir().await.unwrap().unwrap();
        assert_eq!(ent.name, "e1");

        assert!(dirs.remove(h1).is_some());
        assert!(dirs.get(h1).is_none());
        assert!(dirs.remove(h1).is_none());
        assert_eq!(dirs.len(), 1);
    }
}
