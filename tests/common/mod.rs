#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use ftp_mamont::auth::StaticAuthn;
use ftp_mamont::fsio::Fsio;
use ftp_mamont::reply::{ReplyCode, ReplySink};

/// Routes dispatch traces to the test output when `RUST_LOG` asks for it.
pub fn init_logging() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Reply sink that records everything the engine emits.
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Vec<(u32, String)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> Vec<u32> {
        self.lines.iter().map(|(code, _)| *code).collect()
    }

    pub fn last(&self) -> &(u32, String) {
        self.lines.last().expect("at least one reply recorded")
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.lines.push((code.as_u32(), msg.to_owned()));
        Ok(())
    }

    async fn add(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.lines.push((code.as_u32(), msg.to_owned()));
        Ok(())
    }

    async fn add_err(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.lines.push((code.as_u32(), msg.to_owned()));
        Ok(())
    }
}

/// A disk-rooted router over a scratch directory.
pub struct Fixture {
    pub tempdir: TempDir,
    pub fsio: Fsio,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_authn(StaticAuthn::new())
    }

    pub fn with_authn(authn: StaticAuthn) -> Self {
        init_logging();
        let tempdir = TempDir::new().expect("create temp dir");
        let fsio = Fsio::with_system_root(Arc::new(authn));
        Self { tempdir, fsio }
    }

    /// Absolute path of `name` inside the scratch directory.
    pub fn path(&self, name: &str) -> String {
        if name.is_empty() {
            return self.tempdir.path().to_string_lossy().into_owned();
        }
        self.tempdir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn write_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).expect("write fixture file");
    }

    pub fn create_dir(&self, name: &str) {
        std::fs::create_dir_all(self.path(name)).expect("create fixture dir");
    }

    pub fn symlink(&self, target: &str, link: &str) {
        std::os::unix::fs::symlink(target, self.path(link)).expect("create fixture symlink");
    }
}
