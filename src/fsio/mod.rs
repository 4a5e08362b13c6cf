//! The virtual filesystem router.
//!
//! Modules register [`FsDriver`] implementations against path prefixes;
//! every filesystem operation a command handler performs is routed here to
//! the best-matching driver and delegated. The router owns path
//! canonicalization, symlink resolution, tilde expansion, the single-slot
//! stat cache, the chroot prefix remap, and the open-directory registry.
//!
//! The per-session routing state lives in [`Fsio`], threaded through the
//! command handlers of the surrounding server.

pub mod driver;

mod disk;
mod file;
mod glob;
mod opendir;
mod path;
mod resolver;
mod statcache;
mod table;

pub use disk::DiskFs;
pub use driver::{
    DirEnt, DirIter, FileType, FsDriver, FsError, FsFile, FsResult, OpenFlags, Stat, MAX_PATH_LEN,
};
pub use file::Fh;
pub use opendir::DirHandle;
pub use path::{clean_path, dircat};

use std::sync::Arc;

use tracing::trace;

use crate::auth::Authn;

use opendir::OpenDirs;
use statcache::StatCache;
use table::DriverTable;

/// Outcome of tilde expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpolated {
    /// No expansion applied; the path travels as given.
    Verbatim(String),
    /// A `~user` prefix was replaced by the user's home directory.
    Expanded(String),
}

impl Interpolated {
    pub fn into_string(self) -> String {
        match self {
            Interpolated::Verbatim(p) | Interpolated::Expanded(p) => p,
        }
    }
}

/// Which flavor of stat an operation routes through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StatKind {
    Stat,
    Lstat,
}

/// The per-session filesystem router.
pub struct Fsio {
    root: Arc<dyn FsDriver>,
    table: DriverTable,
    cwd_fs: Arc<dyn FsDriver>,
    cwd: String,
    vwd: String,
    statcache: StatCache,
    opendirs: OpenDirs,
    authn: Arc<dyn Authn>,
    user: Option<String>,
}

impl Fsio {
    /// Creates a router with the given default `"/"` driver.
    pub fn new(root: Arc<dyn FsDriver>, authn: Arc<dyn Authn>) -> Self {
        Self {
            cwd_fs: Arc::clone(&root),
            root,
            table: DriverTable::default(),
            cwd: "/".to_owned(),
            vwd: "/".to_owned(),
            statcache: StatCache::default(),
            opendirs: OpenDirs::default(),
            authn,
            user: None,
        }
    }

    /// Creates a router rooted on the local filesystem.
    #[cfg(unix)]
    pub fn with_system_root(authn: Arc<dyn Authn>) -> Self {
        Self::new(Arc::new(DiskFs), authn)
    }

    /// Sets the authenticated user consumed by bare-`~` expansion.
    pub fn set_user(&mut self, user: Option<&str>) {
        self.user = user.map(str::to_owned);
    }

    // --- administration ---------------------------------------------------

    /// Registers a driver at `path`. A trailing slash marks directory
    /// territory and survives cleaning; relative and `~`-deferred prefixes
    /// are stored verbatim.
    pub fn register(&mut self, path: &str, driver: Arc<dyn FsDriver>) -> FsResult<()> {
        if path.is_empty() {
            return Err(FsError::Inval);
        }

        let prefix = if path.starts_with('/') {
            let mut cleaned = clean_path(path);
            if path.ends_with('/') && cleaned != "/" {
                cleaned.push('/');
            }
            cleaned
        } else {
            path.to_owned()
        };

        self.table.insert(prefix, driver)
    }

    /// Unregisters the driver at exactly `path`, dropping every resource
    /// scoped to it once outstanding handles are closed.
    pub fn unregister(&mut self, path: &str) -> FsResult<()> {
        self.table.remove(path).map(drop)
    }

    /// Prefixes currently registered, in table order.
    pub fn registered_prefixes(&self) -> Vec<String> {
        self.table.entries().map(|e| e.prefix.clone()).collect()
    }

    /// Sets the physical working directory, resolving it when possible.
    pub async fn set_cwd(&mut self, dir: &str) {
        self.cwd = match self.resolve_path(dir).await {
            Ok(resolved) => resolved,
            Err(_) => clean_path(dir),
        };
        self.cwd_fs = self.lookup_dir(&self.cwd, true);
    }

    pub fn getcwd(&self) -> &str {
        &self.cwd
    }

    pub fn getvwd(&self) -> &str {
        &self.vwd
    }

    pub fn clear_cache(&mut self) {
        self.statcache.clear();
    }

    /// A path is valid when a registered prefix matches it, or when it is
    /// absolute and thus default-driver territory.
    pub fn valid_path(&self, path: &str) -> FsResult<()> {
        for entry in self.table.entries() {
            if path.starts_with(entry.prefix.as_str()) {
                return Ok(());
            }
        }

        if path.starts_with('/') {
            return Ok(());
        }

        Err(FsError::Inval)
    }

    /// Expands a leading `~user` to the user's home directory.
    ///
    /// A bare `~name` that names an existing file travels verbatim; a bare
    /// `~` (or `~/tail`) expands through the session user.
    pub async fn interpolate(&mut self, p: &str) -> FsResult<Interpolated> {
        if p.is_empty() {
            return Err(FsError::Inval);
        }

        if !p.starts_with('~') {
            return Ok(Interpolated::Verbatim(p.to_owned()));
        }

        let (user, tail) = path::split_tilde(p);

        if tail.is_none() && self.stat(p).await.is_ok() {
            // The literal file "~foo" exists; no expansion.
            return Ok(Interpolated::Verbatim(p.to_owned()));
        }

        let user = if user.is_empty() {
            self.user.clone().ok_or(FsError::NoEnt)?
        } else {
            user.to_owned()
        };

        let home = self.authn.home_dir(&user).await.ok_or(FsError::NoEnt)?;
        Ok(Interpolated::Expanded(path::join_home(&home, tail)))
    }

    // --- driver selection -------------------------------------------------

    /// Returns the best driver for `p` and whether the match was exact.
    /// With nothing registered the default driver handles everything.
    pub fn get_fs(&self, p: &str) -> (Arc<dyn FsDriver>, bool) {
        match self.table.get(p) {
            Some(found) => found,
            None => (Arc::clone(&self.root), false),
        }
    }

    /// Re-derives the cached current-directory driver after table churn.
    fn refresh_cwd_fs(&mut self) {
        if self.table.take_changed() {
            self.cwd_fs = self.lookup_dir(&self.cwd, true);
        }
    }

    /// Selects the driver for `p` by prefix. Directory operations search
    /// with a trailing slash so directory prefixes match correctly.
    fn lookup_dir(&self, p: &str, dir_op: bool) -> Arc<dyn FsDriver> {
        let mut target =
            if p.starts_with('/') { p.to_owned() } else { dircat(&self.cwd, p) };

        if dir_op && !target.ends_with('/') {
            target.push('/');
        }

        self.get_fs(&target).0
    }

    /// Fast-path file lookup. A path without `/` belongs to the current
    /// directory's driver unless it is a symlink, in which case the link
    /// target is re-routed; a driver without `readlink` keeps the
    /// current-directory driver as a deliberate fallback.
    async fn lookup_file(&mut self, p: &str, kind: StatKind) -> Arc<dyn FsDriver> {
        if p.contains('/') {
            return self.lookup_dir(p, false);
        }

        self.refresh_cwd_fs();
        let fs = Arc::clone(&self.cwd_fs);

        let st = match kind {
            StatKind::Stat => fs.stat(p).await,
            StatKind::Lstat => fs.lstat(p).await,
        };

        match st {
            Ok(st) if st.is_symlink() => match fs.readlink(p).await {
                Ok(link) if !link.contains('/') => {
                    let local = format!("./{}", link);
                    self.lookup_file_canon(&local, kind).await.0
                }
                _ => fs,
            },
            _ => fs,
        }
    }

    /// Canonicalizing file lookup: resolves the path first, then routes.
    /// Returns the driver together with the dereferenced path the driver
    /// operation should act on.
    fn lookup_file_canon<'a>(
        &'a mut self,
        p: &'a str,
        kind: StatKind,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = (Arc<dyn FsDriver>, String)> + Send + 'a>,
    > {
        Box::pin(async move {
            let work = match self.resolve_partial(p).await {
                Ok(resolved) => resolved,
                Err(_) if p.starts_with('/') || p.starts_with('~') => {
                    match self.interpolate(p).await {
                        Ok(interp) => interp.into_string(),
                        Err(_) => p.to_owned(),
                    }
                }
                Err(_) => dircat(&self.cwd, p),
            };

            let fs = self.lookup_file(&work, kind).await;
            (fs, work)
        })
    }

    pub(crate) async fn cache_stat(
        &mut self,
        fs: &Arc<dyn FsDriver>,
        p: &str,
        kind: StatKind,
    ) -> FsResult<Stat> {
        if p.is_empty() {
            return Err(FsError::NoEnt);
        }

        // Only absolute names are cached, composed against cwd when needed;
        // this keeps realpath(3) and its extra stat traffic out of the loop.
        let abs = if p.starts_with('/') { p.to_owned() } else { dircat(&self.cwd, p) };

        if let Some(hit) = self.statcache.lookup(&abs) {
            return hit;
        }

        let res = match kind {
            StatKind::Stat => fs.stat(&abs).await,
            StatKind::Lstat => fs.lstat(&abs).await,
        };

        self.statcache.store(&abs, res);
        res
    }

    // --- routed single-path operations ------------------------------------

    pub async fn stat(&mut self, p: &str) -> FsResult<Stat> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} stat()", fs.name());
        self.cache_stat(&fs, p, StatKind::Stat).await
    }

    pub async fn stat_canon(&mut self, p: &str) -> FsResult<Stat> {
        let (fs, _) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} stat()", fs.name());
        self.cache_stat(&fs, p, StatKind::Stat).await
    }

    pub async fn lstat(&mut self, p: &str) -> FsResult<Stat> {
        let fs = self.lookup_file(p, StatKind::Lstat).await;
        trace!("FS: using {} lstat()", fs.name());
        self.cache_stat(&fs, p, StatKind::Lstat).await
    }

    pub async fn lstat_canon(&mut self, p: &str) -> FsResult<Stat> {
        let (fs, _) = self.lookup_file_canon(p, StatKind::Lstat).await;
        trace!("FS: using {} lstat()", fs.name());
        self.cache_stat(&fs, p, StatKind::Lstat).await
    }

    pub async fn readlink(&mut self, p: &str) -> FsResult<String> {
        let fs = self.lookup_file(p, StatKind::Lstat).await;
        trace!("FS: using {} readlink()", fs.name());
        fs.readlink(p).await
    }

    pub async fn readlink_canon(&mut self, p: &str) -> FsResult<String> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Lstat).await;
        trace!("FS: using {} readlink()", fs.name());
        fs.readlink(&deref).await
    }

    pub async fn unlink(&mut self, p: &str) -> FsResult<()> {
        let fs = self.lookup_file(p, StatKind::Lstat).await;
        trace!("FS: using {} unlink()", fs.name());
        fs.unlink(p).await
    }

    pub async fn unlink_canon(&mut self, p: &str) -> FsResult<()> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Lstat).await;
        trace!("FS: using {} unlink()", fs.name());
        fs.unlink(&deref).await
    }

    pub async fn truncate(&mut self, p: &str, len: u64) -> FsResult<()> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} truncate()", fs.name());
        fs.truncate(p, len).await
    }

    pub async fn truncate_canon(&mut self, p: &str, len: u64) -> FsResult<()> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} truncate()", fs.name());
        fs.truncate(&deref, len).await
    }

    pub async fn chmod(&mut self, p: &str, mode: u32) -> FsResult<()> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} chmod()", fs.name());
        fs.chmod(p, mode).await
    }

    pub async fn chmod_canon(&mut self, p: &str, mode: u32) -> FsResult<()> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} chmod()", fs.name());
        fs.chmod(&deref, mode).await
    }

    pub async fn chown(&mut self, p: &str, uid: u32, gid: u32) -> FsResult<()> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} chown()", fs.name());
        fs.chown(p, uid, gid).await
    }

    pub async fn chown_canon(&mut self, p: &str, uid: u32, gid: u32) -> FsResult<()> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} chown()", fs.name());
        fs.chown(&deref, uid, gid).await
    }

    pub async fn open(&mut self, p: &str, flags: OpenFlags) -> FsResult<Fh> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} open()", fs.name());
        let f = fs.open(p, flags).await?;
        Ok(Fh::new(p, fs, f))
    }

    pub async fn open_canon(&mut self, p: &str, flags: OpenFlags) -> FsResult<Fh> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} open()", fs.name());
        let f = fs.open(&deref, flags).await?;
        Ok(Fh::new(p, fs, f))
    }

    pub async fn creat(&mut self, p: &str, mode: u32) -> FsResult<Fh> {
        let fs = self.lookup_file(p, StatKind::Stat).await;
        trace!("FS: using {} creat()", fs.name());
        let f = fs.creat(p, mode).await?;
        Ok(Fh::new(p, fs, f))
    }

    pub async fn creat_canon(&mut self, p: &str, mode: u32) -> FsResult<Fh> {
        let (fs, deref) = self.lookup_file_canon(p, StatKind::Stat).await;
        trace!("FS: using {} creat()", fs.name());
        let f = fs.creat(&deref, mode).await?;
        Ok(Fh::new(p, fs, f))
    }

    // --- routed two-path operations ---------------------------------------

    pub async fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let fs = self.lookup_file(from, StatKind::Lstat).await;
        let to_fs = self.lookup_file(to, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &to_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} rename()", fs.name());
        fs.rename(from, to).await
    }

    pub async fn rename_canon(&mut self, from: &str, to: &str) -> FsResult<()> {
        let (fs, from_deref) = self.lookup_file_canon(from, StatKind::Lstat).await;
        let (to_fs, to_deref) = self.lookup_file_canon(to, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &to_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} rename()", fs.name());
        fs.rename(&from_deref, &to_deref).await
    }

    pub async fn link(&mut self, from: &str, to: &str) -> FsResult<()> {
        let fs = self.lookup_file(from, StatKind::Lstat).await;
        let to_fs = self.lookup_file(to, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &to_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} link()", fs.name());
        fs.link(from, to).await
    }

    pub async fn link_canon(&mut self, from: &str, to: &str) -> FsResult<()> {
        let (fs, from_deref) = self.lookup_file_canon(from, StatKind::Lstat).await;
        let (to_fs, to_deref) = self.lookup_file_canon(to, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &to_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} link()", fs.name());
        fs.link(&from_deref, &to_deref).await
    }

    /// Creates a symlink at `link` pointing to `target`. Both paths must
    /// route to the same driver; the target may still dangle.
    pub async fn symlink(&mut self, target: &str, link: &str) -> FsResult<()> {
        let fs = self.lookup_file(target, StatKind::Lstat).await;
        let link_fs = self.lookup_file(link, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &link_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} symlink()", fs.name());
        fs.symlink(target, link).await
    }

    /// `symlink` through resolution of the link location. The target
    /// travels verbatim so relative link contents survive.
    pub async fn symlink_canon(&mut self, target: &str, link: &str) -> FsResult<()> {
        let fs = self.lookup_file(target, StatKind::Lstat).await;
        let (link_fs, link_deref) = self.lookup_file_canon(link, StatKind::Lstat).await;

        if !Arc::ptr_eq(&fs, &link_fs) {
            return Err(FsError::XDev);
        }

        trace!("FS: using {} symlink()", link_fs.name());
        link_fs.symlink(target, &link_deref).await
    }

    // --- routed directory operations --------------------------------------

    pub async fn mkdir(&mut self, p: &str, mode: u32) -> FsResult<()> {
        let fs = self.lookup_dir(p, true);
        trace!("FS: using {} mkdir()", fs.name());
        fs.mkdir(p, mode).await
    }

    pub async fn rmdir(&mut self, p: &str) -> FsResult<()> {
        let fs = self.lookup_dir(p, true);
        trace!("FS: using {} rmdir()", fs.name());
        fs.rmdir(p).await
    }

    /// Changes the working directory. With `hide_symlinks` the virtual
    /// working directory keeps the path as typed rather than the symlink
    /// target.
    pub async fn chdir(&mut self, p: &str, hide_symlinks: bool) -> FsResult<()> {
        let cleaned = clean_path(p);
        let fs = self.lookup_dir(p, true);
        trace!("FS: using {} chdir()", fs.name());
        fs.chdir(&cleaned).await?;

        self.cwd_fs = fs;
        self.vwd = if hide_symlinks { self.virtual_path(p).await? } else { cleaned };
        Ok(())
    }

    /// `chdir` through full resolution of the target first.
    pub async fn chdir_canon(&mut self, p: &str, hide_symlinks: bool) -> FsResult<()> {
        let resolved = self.resolve_partial(p).await?;
        let fs = self.lookup_dir(&resolved, true);
        trace!("FS: using {} chdir()", fs.name());
        fs.chdir(&resolved).await?;

        self.cwd_fs = fs;
        self.vwd = if hide_symlinks { self.virtual_path(p).await? } else { resolved };
        Ok(())
    }

    /// Changes the process root. On success every registered prefix is
    /// rewritten relative to the new root: prefixes under it are
    /// left-truncated, absolute prefixes outside it are dropped, and
    /// relative or `~`-deferred prefixes are kept verbatim.
    pub async fn chroot(&mut self, p: &str) -> FsResult<()> {
        let cleaned = clean_path(p);
        let fs = self.lookup_dir(&cleaned, true);
        trace!("FS: using {} chroot()", fs.name());
        fs.chroot(&cleaned).await?;

        if cleaned != "/" {
            if let Some(new_default) = self.table.remap_chroot(&cleaned) {
                self.root = new_default;
            }
        }

        Ok(())
    }

    pub async fn opendir(&mut self, p: &str) -> FsResult<DirHandle> {
        let fs = if p.contains('/') {
            let resolved = self.resolve_partial(p).await?;
            self.lookup_dir(&resolved, true)
        } else {
            self.refresh_cwd_fs();
            Arc::clone(&self.cwd_fs)
        };

        trace!("FS: using {} opendir()", fs.name());
        let iter = fs.opendir(p).await?;
        Ok(self.opendirs.insert(fs, iter))
    }

    pub async fn readdir(&mut self, handle: DirHandle) -> FsResult<Option<DirEnt>> {
        let entry = self.opendirs.get(handle).ok_or(FsError::Inval)?;
        trace!("FS: using {} readdir()", entry.driver.name());
        let mut iter = entry.iter.lock().await;
        iter.readdir().await
    }

    pub async fn closedir(&mut self, handle: DirHandle) -> FsResult<()> {
        let entry = self.opendirs.remove(handle).ok_or(FsError::Inval)?;
        trace!("FS: using {} closedir()", entry.driver.name());
        let mut iter = entry.iter.lock().await;
        iter.closedir().await
    }

    /// Number of directory iterators currently open.
    pub fn open_dir_count(&self) -> usize {
        self.opendirs.len()
    }
}

/// Available space, in kilobytes, on the filesystem containing `path`.
#[cfg(unix)]
pub fn getsize(path: &str) -> std::io::Result<u64> {
    use std::ffi::CString;

    let c_path =
        CString::new(path).map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };

    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok((vfs.f_bavail as u64).saturating_mul(vfs.f_frsize as u64) / 1024)
}
