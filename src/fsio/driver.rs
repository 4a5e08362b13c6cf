//! Filesystem driver capability traits.
//!
//! A driver owns a path prefix in the router's table and implements some
//! subset of the filesystem operations. Every trait method has a default
//! body returning [`FsError::Perm`]: an operation a driver does not
//! override is "not permitted" at dispatch time, which is how modules
//! publish read-only or synthetic filesystems without stubbing out the
//! whole surface.

use std::io;
use std::io::SeekFrom;

use async_trait::async_trait;

/// Maximum number of bytes in a path handled by the router.
pub const MAX_PATH_LEN: usize = 1024;

/// Result alias used by every driver operation.
pub type FsResult<T> = Result<T, FsError>;

/// Error taxonomy of the router and its drivers.
///
/// The named variants carry routing semantics; everything else travels as
/// `Io` with the original OS errno so it can round-trip to the reply
/// classification in the transfer engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Malformed argument (empty path, relative where absolute required).
    Inval,
    /// Capability absent on the selected driver.
    Perm,
    /// Two-path operation spanning two drivers.
    XDev,
    /// Resolution failed at a terminal component.
    NoEnt,
    /// Symlink chain exceeded the hop bound or revisited an inode.
    Loop,
    /// Intermediate path component is not a directory.
    NotDir,
    /// Underlying I/O failure, with the original errno.
    Io(i32),
}

impl FsError {
    /// The errno equivalent of this error.
    pub fn errno(self) -> i32 {
        match self {
            FsError::Inval => libc::EINVAL,
            FsError::Perm => libc::EPERM,
            FsError::XDev => libc::EXDEV,
            FsError::NoEnt => libc::ENOENT,
            FsError::Loop => libc::ELOOP,
            FsError::NotDir => libc::ENOTDIR,
            FsError::Io(errno) => errno,
        }
    }

    pub fn from_raw_os_error(errno: i32) -> Self {
        match errno {
            libc::EINVAL => FsError::Inval,
            libc::EPERM => FsError::Perm,
            libc::EXDEV => FsError::XDev,
            libc::ENOENT => FsError::NoEnt,
            libc::ELOOP => FsError::Loop,
            libc::ENOTDIR => FsError::NotDir,
            other => FsError::Io(other),
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => FsError::from_raw_os_error(errno),
            None => match err.kind() {
                io::ErrorKind::NotFound => FsError::NoEnt,
                io::ErrorKind::PermissionDenied => FsError::Perm,
                io::ErrorKind::InvalidInput => FsError::Inval,
                _ => FsError::Io(libc::EIO),
            },
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        io::Error::from_raw_os_error(err.errno())
    }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.errno()))
    }
}

impl std::error::Error for FsError {}

/// File types reported by `stat`-family operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharacterDevice,
    Socket,
    Fifo,
}

/// Subset of `struct stat` the router and command handlers consume.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stat {
    pub file_type: FileType,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub ino: u64,
    pub dev: u64,
    /// Seconds since the epoch.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn is_regular(&self) -> bool {
        self.file_type == FileType::Regular
    }
}

/// Open disposition for [`FsDriver::open`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const APPEND: u32 = 0x04;
    pub const CREATE: u32 = 0x08;
    pub const TRUNCATE: u32 = 0x10;
    pub const EXCL: u32 = 0x20;

    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn read() -> Self {
        Self(Self::READ)
    }

    pub fn write() -> Self {
        Self(Self::WRITE | Self::CREATE | Self::TRUNCATE)
    }

    pub fn append() -> Self {
        Self(Self::WRITE | Self::CREATE | Self::APPEND)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

/// A single directory entry yielded by [`DirIter::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    pub name: String,
    pub file_type: Option<FileType>,
}

/// An open file, produced by [`FsDriver::open`] or [`FsDriver::creat`].
///
/// The fd-level half of the driver vtable lives here.
#[async_trait]
pub trait FsFile: Send {
    async fn read(&mut self, _buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::Perm)
    }

    async fn write(&mut self, _buf: &[u8]) -> FsResult<usize> {
        Err(FsError::Perm)
    }

    async fn lseek(&mut self, _pos: SeekFrom) -> FsResult<u64> {
        Err(FsError::Perm)
    }

    async fn fstat(&mut self) -> FsResult<Stat> {
        Err(FsError::Perm)
    }

    async fn ftruncate(&mut self, _len: u64) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn close(&mut self) -> FsResult<()> {
        Err(FsError::Perm)
    }

    /// Raw descriptor for zero-copy dispatch, if the file is backed by one.
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }
}

/// An open directory iterator, produced by [`FsDriver::opendir`].
#[async_trait]
pub trait DirIter: Send {
    /// Next entry, or `None` at end of directory.
    async fn readdir(&mut self) -> FsResult<Option<DirEnt>> {
        Err(FsError::Perm)
    }

    async fn closedir(&mut self) -> FsResult<()> {
        Err(FsError::Perm)
    }
}

/// The path-level half of a filesystem driver.
#[async_trait]
pub trait FsDriver: Send + Sync {
    /// Short name used in dispatch traces.
    fn name(&self) -> &str;

    async fn stat(&self, _path: &str) -> FsResult<Stat> {
        Err(FsError::Perm)
    }

    async fn lstat(&self, _path: &str) -> FsResult<Stat> {
        Err(FsError::Perm)
    }

    async fn rename(&self, _from: &str, _to: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn unlink(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn open(&self, _path: &str, _flags: OpenFlags) -> FsResult<Box<dyn FsFile>> {
        Err(FsError::Perm)
    }

    async fn creat(&self, _path: &str, _mode: u32) -> FsResult<Box<dyn FsFile>> {
        Err(FsError::Perm)
    }

    async fn link(&self, _from: &str, _to: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn readlink(&self, _path: &str) -> FsResult<String> {
        Err(FsError::Perm)
    }

    async fn symlink(&self, _target: &str, _link: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn truncate(&self, _path: &str, _len: u64) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn chmod(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn chdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn chroot(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn opendir(&self, _path: &str) -> FsResult<Box<dyn DirIter>> {
        Err(FsError::Perm)
    }

    async fn mkdir(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::Perm)
    }

    async fn rmdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Perm)
    }
}
