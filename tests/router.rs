mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use common::Fixture;
use ftp_mamont::auth::StaticAuthn;
use ftp_mamont::fsio::{
    clean_path, FileType, FsDriver, FsError, FsResult, Interpolated, OpenFlags, Stat,
};

/// Driver with no capabilities beyond a name.
struct Inert(&'static str);

impl FsDriver for Inert {
    fn name(&self) -> &str {
        self.0
    }
}

/// Driver that accepts `chroot` and counts `stat` calls.
struct Synthetic {
    name: &'static str,
    stats: AtomicU32,
}

impl Synthetic {
    fn new() -> Self {
        Self::named("synthetic")
    }

    fn named(name: &'static str) -> Self {
        Self { name, stats: AtomicU32::new(0) }
    }

    fn fixed_stat() -> Stat {
        Stat {
            file_type: FileType::Regular,
            mode: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 99,
            ino: 4242,
            dev: 1,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }
}

#[async_trait]
impl FsDriver for Synthetic {
    fn name(&self) -> &str {
        self.name
    }

    async fn stat(&self, _path: &str) -> FsResult<Stat> {
        self.stats.fetch_add(1, Ordering::Relaxed);
        Ok(Self::fixed_stat())
    }

    async fn lstat(&self, _path: &str) -> FsResult<Stat> {
        Ok(Self::fixed_stat())
    }

    async fn chroot(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn registered_prefix_routes_exactly() {
    let mut fixture = Fixture::new();
    let driver: Arc<dyn FsDriver> = Arc::new(Inert("mod_a"));
    fixture.fsio.register("/x/", Arc::clone(&driver)).unwrap();

    let (fs, exact) = fixture.fsio.get_fs("/x/");
    assert!(exact);
    assert!(Arc::ptr_eq(&fs, &driver));

    let (fs, exact) = fixture.fsio.get_fs("/x/some/file");
    assert!(!exact);
    assert_eq!(fs.name(), "mod_a");
}

#[tokio::test]
async fn longer_prefix_shadows_shorter() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("outer"))).unwrap();
    fixture.fsio.register("/x/inner/", Arc::new(Inert("inner"))).unwrap();

    let (fs, _) = fixture.fsio.get_fs("/x/inner/f");
    assert_eq!(fs.name(), "inner");
    let (fs, _) = fixture.fsio.get_fs("/x/f");
    assert_eq!(fs.name(), "outer");
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("one"))).unwrap();
    let err = fixture.fsio.register("/x/", Arc::new(Inert("two"))).unwrap_err();
    assert_eq!(err, FsError::Inval);
}

#[tokio::test]
async fn unregister_restores_default_routing() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("mod_a"))).unwrap();
    fixture.fsio.unregister("/x/").unwrap();

    let (fs, _) = fixture.fsio.get_fs("/x/file");
    assert_eq!(fs.name(), "system");
    assert!(fixture.fsio.registered_prefixes().is_empty());
}

#[tokio::test]
async fn cross_driver_rename_is_exdev() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("d1"))).unwrap();
    fixture.fsio.register("/y/", Arc::new(Inert("d2"))).unwrap();

    // Neither driver implements rename; EXDEV must win over EPERM,
    // proving neither driver was consulted.
    let err = fixture.fsio.rename("/x/f", "/y/g").await.unwrap_err();
    assert_eq!(err, FsError::XDev);
}

#[tokio::test]
async fn cross_driver_symlink_is_exdev() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("d1"))).unwrap();
    fixture.fsio.register("/y/", Arc::new(Inert("d2"))).unwrap();

    let err = fixture.fsio.symlink("/x/target", "/y/link").await.unwrap_err();
    assert_eq!(err, FsError::XDev);

    // Same driver on both sides gets past the check and hits the
    // capability gate instead.
    let err = fixture.fsio.symlink("/x/target", "/x/link").await.unwrap_err();
    assert_eq!(err, FsError::Perm);
}

#[tokio::test]
async fn missing_capability_is_eperm() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("/x/", Arc::new(Inert("d1"))).unwrap();

    let err = fixture.fsio.unlink("/x/f").await.unwrap_err();
    assert_eq!(err, FsError::Perm);

    let err = fixture.fsio.rename("/x/a", "/x/b").await.unwrap_err();
    assert_eq!(err, FsError::Perm);
}

#[tokio::test]
async fn chroot_rewrites_registered_prefixes() {
    let mut fixture = Fixture::new();
    let driver: Arc<dyn FsDriver> = Arc::new(Synthetic::new());
    fixture.fsio.register("/srv/data/", Arc::clone(&driver)).unwrap();

    fixture.fsio.chroot("/srv").await.unwrap();

    assert_eq!(fixture.fsio.registered_prefixes(), vec!["/data/"]);
    let (fs, _) = fixture.fsio.get_fs("/data/f");
    assert!(Arc::ptr_eq(&fs, &driver));
}

#[tokio::test]
async fn chroot_drops_outside_absolute_prefixes() {
    let mut fixture = Fixture::new();
    // The lowest-sorting prefix is the routing fallback for the chroot
    // call itself, so it needs the capability too.
    fixture.fsio.register("/srv/data/", Arc::new(Synthetic::new())).unwrap();
    fixture.fsio.register("/opt/away/", Arc::new(Synthetic::named("away"))).unwrap();
    fixture.fsio.register("~home/", Arc::new(Inert("deferred"))).unwrap();

    fixture.fsio.chroot("/srv").await.unwrap();

    assert_eq!(fixture.fsio.registered_prefixes(), vec!["/data/", "~home/"]);
}

#[tokio::test]
async fn stat_cache_absorbs_repeats_until_cleared() {
    let mut fixture = Fixture::new();
    let driver = Arc::new(Synthetic::new());
    fixture.fsio.register("/v/", Arc::clone(&driver) as Arc<dyn FsDriver>).unwrap();

    let first = fixture.fsio.stat("/v/file").await.unwrap();
    let second = fixture.fsio.stat("/v/file").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(driver.stats.load(Ordering::Relaxed), 1);

    fixture.fsio.clear_cache();
    fixture.fsio.stat("/v/file").await.unwrap();
    assert_eq!(driver.stats.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn resolve_follows_symlinks_to_canonical_path() {
    let mut fixture = Fixture::new();
    fixture.create_dir("real");
    fixture.write_file("real/file.txt", b"payload");
    fixture.symlink(&fixture.path("real"), "alias");

    let resolved = fixture.fsio.resolve_path(&fixture.path("alias/file.txt")).await.unwrap();
    assert_eq!(resolved, fixture.path("real/file.txt"));
}

#[tokio::test]
async fn resolve_full_rejects_missing_terminal() {
    let mut fixture = Fixture::new();
    let err = fixture.fsio.resolve_path(&fixture.path("missing")).await.unwrap_err();
    assert_eq!(err, FsError::NoEnt);
}

#[tokio::test]
async fn resolve_partial_accepts_missing_terminal() {
    let mut fixture = Fixture::new();
    fixture.create_dir("exists");

    let target = fixture.path("exists/newfile");
    let resolved = fixture.fsio.resolve_partial(&target).await.unwrap();
    assert_eq!(resolved, target);

    // A missing intermediate component is still an error.
    let err = fixture.fsio.resolve_partial(&fixture.path("gone/newfile")).await.unwrap_err();
    assert_eq!(err, FsError::NoEnt);
}

#[tokio::test]
async fn symlink_cycle_is_eloop() {
    let mut fixture = Fixture::new();
    fixture.symlink(&fixture.path("b"), "a");
    fixture.symlink(&fixture.path("a"), "b");

    let err = fixture.fsio.resolve_path(&fixture.path("a")).await.unwrap_err();
    assert_eq!(err, FsError::Loop);

    let err = fixture.fsio.resolve_partial(&fixture.path("a")).await.unwrap_err();
    assert_eq!(err, FsError::Loop);
}

#[tokio::test]
async fn tilde_expansion_through_authn() {
    let mut fixture =
        Fixture::with_authn(StaticAuthn::new().with_user("ftp", "/srv/ftp-home"));
    fixture.fsio.set_user(Some("ftp"));

    let out = fixture.fsio.interpolate("~/pub/file").await.unwrap();
    assert_eq!(out, Interpolated::Expanded("/srv/ftp-home/pub/file".to_owned()));

    let out = fixture.fsio.interpolate("~ftp").await.unwrap();
    assert_eq!(out, Interpolated::Expanded("/srv/ftp-home".to_owned()));

    let err = fixture.fsio.interpolate("~nobody/x").await.unwrap_err();
    assert_eq!(err, FsError::NoEnt);

    let out = fixture.fsio.interpolate("/plain").await.unwrap();
    assert_eq!(out, Interpolated::Verbatim("/plain".to_owned()));
}

#[tokio::test]
async fn open_read_write_through_router() {
    let mut fixture = Fixture::new();
    let path = fixture.path("upload.bin");

    let mut fh = fixture.fsio.open(&path, OpenFlags::write()).await.unwrap();
    fh.write_all(b"through the router").await.unwrap();
    fh.close().await.unwrap();

    let mut fh = fixture.fsio.open(&path, OpenFlags::read()).await.unwrap();
    let mut buf = [0u8; 64];
    let n = fh.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"through the router");
    assert_eq!(fh.fstat().await.unwrap().size, 18);
    fh.close().await.unwrap();
}

#[tokio::test]
async fn line_reads_join_continuations() {
    let mut fixture = Fixture::new();
    let path = fixture.path("motd.txt");
    fixture.write_file("motd.txt", b"plain line\nsplit \\\nline\nlast");

    let mut fh = fixture.fsio.open(&path, OpenFlags::read()).await.unwrap();
    let mut lineno = 0;

    assert_eq!(fh.getline(&mut lineno).await.unwrap().as_deref(), Some("plain line\n"));
    assert_eq!(fh.getline(&mut lineno).await.unwrap().as_deref(), Some("split line\n"));
    assert_eq!(fh.getline(&mut lineno).await.unwrap().as_deref(), Some("last"));
    assert_eq!(fh.getline(&mut lineno).await.unwrap(), None);
    assert_eq!(lineno, 3);
}

#[tokio::test]
async fn opendir_registry_tracks_iterators() {
    let mut fixture = Fixture::new();
    fixture.write_file("one", b"");
    fixture.write_file("two", b"");

    let handle = fixture.fsio.opendir(&fixture.path("")).await.unwrap();
    assert_eq!(fixture.fsio.open_dir_count(), 1);

    let mut names = Vec::new();
    while let Some(entry) = fixture.fsio.readdir(handle).await.unwrap() {
        names.push(entry.name);
    }
    names.sort();
    assert_eq!(names, vec!["one", "two"]);

    fixture.fsio.closedir(handle).await.unwrap();
    assert_eq!(fixture.fsio.open_dir_count(), 0);

    // A closed handle no longer resolves.
    assert_eq!(fixture.fsio.readdir(handle).await.unwrap_err(), FsError::Inval);
}

#[tokio::test]
async fn glob_expands_through_the_router() {
    let mut fixture = Fixture::new();
    fixture.write_file("a.txt", b"");
    fixture.write_file("b.txt", b"");
    fixture.write_file("c.log", b"");
    fixture.write_file(".hidden.txt", b"");
    fixture.create_dir("sub");
    fixture.write_file("sub/d.txt", b"");

    let pattern = fixture.path("*.txt");
    let matches = fixture.fsio.glob(&pattern).await.unwrap();
    assert_eq!(matches, vec![fixture.path("a.txt"), fixture.path("b.txt")]);

    let pattern = fixture.path("*/*.txt");
    let matches = fixture.fsio.glob(&pattern).await.unwrap();
    assert_eq!(matches, vec![fixture.path("sub/d.txt")]);

    let matches = fixture.fsio.glob(&fixture.path("*.gone")).await.unwrap();
    assert!(matches.is_empty());
}

#[tokio::test]
async fn valid_path_accepts_registered_and_absolute() {
    let mut fixture = Fixture::new();
    fixture.fsio.register("virtual:", Arc::new(Inert("v"))).unwrap();

    assert!(fixture.fsio.valid_path("/anything").is_ok());
    assert!(fixture.fsio.valid_path("virtual:thing").is_ok());
    assert_eq!(fixture.fsio.valid_path("relative/x").unwrap_err(), FsError::Inval);
}

#[tokio::test]
async fn set_cwd_normalizes_and_reroutes() {
    let mut fixture = Fixture::new();
    fixture.create_dir("work");

    let dir = fixture.path("work");
    fixture.fsio.set_cwd(&format!("{}/./", dir)).await;
    assert_eq!(fixture.fsio.getcwd(), dir);
}

#[tokio::test]
async fn virtual_path_stays_lexical() {
    let mut fixture = Fixture::new();
    let vpath = fixture.fsio.virtual_path("/a/b/../c").await.unwrap();
    assert_eq!(vpath, "/a/c");

    // Relative input composes against the virtual working directory.
    let vpath = fixture.fsio.virtual_path("x/y").await.unwrap();
    assert_eq!(vpath, "/x/y");
}

#[tokio::test]
async fn clean_path_reexport_matches_property() {
    for p in ["/a/./b", "a/../..", "/x//y/"] {
        let once = clean_path(p);
        assert_eq!(clean_path(&once), once);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn getsize_reports_capacity() {
    assert!(ftp_mamont::fsio::getsize("/").is_ok());
}
