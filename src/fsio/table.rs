//! The driver table: an ordered registry of `(prefix, driver)` pairs.
//!
//! Prefixes are kept sorted lexicographically; directory drivers carry a
//! trailing slash, which is how file and directory territory is told apart
//! during matching. The default `"/"` driver is owned by the router and is
//! never an entry here.

use std::sync::Arc;

use super::driver::{FsDriver, FsError, FsResult};

pub(super) struct DriverEntry {
    pub(super) prefix: String,
    pub(super) driver: Arc<dyn FsDriver>,
}

#[derive(Default)]
pub(super) struct DriverTable {
    entries: Vec<DriverEntry>,
    /// Set after every mutation; lookups that cache a result consult it.
    changed: bool,
}

impl DriverTable {
    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn entries(&self) -> impl Iterator<Item = &DriverEntry> {
        self.entries.iter()
    }

    /// Registers a driver at an already-cleaned prefix.
    ///
    /// Layering is not supported: a second driver at the same prefix is
    /// rejected outright.
    pub(super) fn insert(&mut self, prefix: String, driver: Arc<dyn FsDriver>) -> FsResult<()> {
        if self.entries.iter().any(|e| e.prefix == prefix) {
            return Err(FsError::Inval);
        }

        self.entries.push(DriverEntry { prefix, driver });
        self.sort();
        self.changed = true;
        Ok(())
    }

    /// Removes the driver at exactly `prefix`, returning it.
    pub(super) fn remove(&mut self, prefix: &str) -> FsResult<Arc<dyn FsDriver>> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.prefix == prefix)
            .ok_or(FsError::NoEnt)?;

        let entry = self.entries.remove(idx);
        self.changed = true;
        Ok(entry.driver)
    }

    /// Finds the driver responsible for `path`.
    ///
    /// The best match is the latest directory prefix (one ending in `/`)
    /// that fully prefixes `path`; an exact prefix match wins immediately.
    /// When the path sorts past every prefix the running best match is
    /// returned, and `None` only when the table is empty.
    pub(super) fn get(&self, path: &str) -> Option<(Arc<dyn FsDriver>, bool)> {
        let first = self.entries.first()?;
        let mut best = first;

        for entry in &self.entries {
            if entry.prefix.ends_with('/') && path.starts_with(entry.prefix.as_str()) {
                best = entry;
            }

            match entry.prefix.as_str().cmp(path) {
                std::cmp::Ordering::Equal => return Some((Arc::clone(&entry.driver), true)),
                std::cmp::Ordering::Greater => return Some((Arc::clone(&best.driver), false)),
                std::cmp::Ordering::Less => {}
            }
        }

        Some((Arc::clone(&best.driver), false))
    }

    /// Rewrites the table after a successful `chroot(new_root)`.
    ///
    /// Prefixes inside the new root are left-truncated by it; absolute
    /// prefixes outside the new root are dropped; relative and
    /// tilde-deferred prefixes are kept verbatim. An entry whose prefix
    /// collapses onto the new root itself is returned to the caller to
    /// become the default driver.
    pub(super) fn remap_chroot(&mut self, new_root: &str) -> Option<Arc<dyn FsDriver>> {
        let mut new_default = None;
        let mut survivors = Vec::with_capacity(self.entries.len());

        for mut entry in self.entries.drain(..) {
            if let Some(stripped) = entry.prefix.strip_prefix(new_root) {
                if stripped.is_empty() || stripped == "/" {
                    new_default = Some(entry.driver);
                } else {
                    entry.prefix = stripped.to_owned();
                    survivors.push(entry);
                }
            } else if !entry.prefix.starts_with('/') {
                survivors.push(entry);
            }
            // Absolute prefixes outside the new root vanish here.
        }

        self.entries = survivors;
        self.sort();
        self.changed = true;
        new_default
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    }

    /// Reads and clears the change flag.
    pub(super) fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(String);

    impl FsDriver for Tagged {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn driver(name: &str) -> Arc<dyn FsDriver> {
        Arc::new(Tagged(name.to_owned()))
    }

    fn table(prefixes: &[&str]) -> DriverTable {
        let mut t = DriverTable::default();
        for p in prefixes {
            t.insert((*p).to_owned(), driver(p)).unwrap();
        }
        t
    }

    #[test]
    fn empty_table_has_no_match() {
        let t = DriverTable::default();
        assert!(t.get("/anything").is_none());
    }

    #[test]
    fn exact_prefix_match_is_reported() {
        let t = table(&["/x/", "/y/"]);
        let (fs, exact) = t.get("/x/").unwrap();
        assert_eq!(fs.name(), "/x/");
        assert!(exact);
    }

    #[test]
    fn longest_directory_prefix_wins() {
        let t = table(&["/x/", "/x/deep/"]);
        let (fs, exact) = t.get("/x/deep/file").unwrap();
        assert_eq!(fs.name(), "/x/deep/");
        assert!(!exact);

        let (fs, _) = t.get("/x/file").unwrap();
        assert_eq!(fs.name(), "/x/");
    }

    #[test]
    fn duplicate_prefix_is_rejected() {
        let mut t = table(&["/x/"]);
        assert_eq!(t.insert("/x/".to_owned(), driver("dup")).unwrap_err(), FsError::Inval);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_by_exact_prefix() {
        let mut t = table(&["/x/", "/y/"]);
        assert!(t.remove("/nope/").is_err());
        t.remove("/x/").unwrap();
        assert_eq!(t.len(), 1);
        let (fs, _) = t.get("/y/f").unwrap();
        assert_eq!(fs.name(), "/y/");
    }

    #[test]
    fn mutation_sets_change_flag() {
        let mut t = DriverTable::default();
        assert!(!t.take_changed());
        t.insert("/x/".to_owned(), driver("x")).unwrap();
        assert!(t.take_changed());
        assert!(!t.take_changed());
        t.remove("/x/").unwrap();
        assert!(t.take_changed());
    }

    #[test]
    fn chroot_remap_truncates_and_drops() {
        let mut t = DriverTable::default();
        t.insert("/srv/data/".to_owned(), driver("data")).unwrap();
        t.insert("/srv/incoming/".to_owned(), driver("incoming")).unwrap();
        t.insert("/opt/other/".to_owned(), driver("other")).unwrap();
        t.insert("~deferred/".to_owned(), driver("deferred")).unwrap();

        let new_default = t.remap_chroot("/srv");
        assert!(new_default.is_none());

        let prefixes: Vec<_> = t.entries().map(|e| e.prefix.clone()).collect();
        assert_eq!(prefixes, vec!["/data/", "/incoming/", "~deferred/"]);

        let (fs, _) = t.get("/data/f").unwrap();
        assert_eq!(fs.name(), "data");
    }

    #[test]
    fn chroot_remap_promotes_exact_root_driver() {
        let mut t = DriverTable::default();
        t.insert("/jail/".to_owned(), driver("jail")).unwrap();
        t.insert("/jail/pub/".to_owned(), driver("pub")).unwrap();

        let new_default = t.remap_chroot("/jail");
        assert_eq!(new_default.unwrap().name(), "jail");
        let prefixes: Vec<_> = t.entries().map(|e| e.prefix.clone()).collect();
        assert_eq!(prefixes, vec!["/pub/"]);
    }
}
