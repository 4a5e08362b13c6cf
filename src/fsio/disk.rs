//! The system driver: the full capability set over the local filesystem.
//!
//! This is the default `"/"` driver every session starts with. Modules
//! that publish virtual trees register their own [`FsDriver`] impls over
//! some prefix and override only what they support.

use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::driver::{
    DirEnt, DirIter, FileType, FsDriver, FsError, FsFile, FsResult, OpenFlags, Stat,
};

pub struct DiskFs;

fn file_type_of(meta: &std::fs::Metadata) -> FileType {
    let ft = meta.file_type();
    use std::os::unix::fs::FileTypeExt;

    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharacterDevice
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_fifo() {
        FileType::Fifo
    } else {
        FileType::Regular
    }
}

pub(super) fn stat_from_meta(meta: &std::fs::Metadata) -> Stat {
    Stat {
        file_type: file_type_of(meta),
        mode: meta.mode(),
        nlink: meta.nlink(),
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.len(),
        ino: meta.ino(),
        dev: meta.dev(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
    }
}

struct DiskFile {
    file: File,
}

#[async_trait]
impl FsFile for DiskFile {
    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        Ok(self.file.write(buf).await?)
    }

    async fn lseek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        Ok(self.file.seek(pos).await?)
    }

    async fn fstat(&mut self) -> FsResult<Stat> {
        let meta = self.file.metadata().await?;
        Ok(stat_from_meta(&meta))
    }

    async fn ftruncate(&mut self, len: u64) -> FsResult<()> {
        Ok(self.file.set_len(len).await?)
    }

    async fn close(&mut self) -> FsResult<()> {
        Ok(self.file.flush().await?)
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        Some(self.file.as_raw_fd())
    }
}

struct DiskDir {
    inner: fs::ReadDir,
}

#[async_trait]
impl DirIter for DiskDir {
    async fn readdir(&mut self) -> FsResult<Option<DirEnt>> {
        let Some(entry) = self.inner.next_entry().await? else {
            return Ok(None);
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().await.ok().map(|ft| {
            if ft.is_dir() {
                FileType::Directory
            } else if ft.is_symlink() {
                FileType::Symlink
            } else {
                FileType::Regular
            }
        });

        Ok(Some(DirEnt { name, file_type }))
    }

    async fn closedir(&mut self) -> FsResult<()> {
        Ok(())
    }
}

#[async_trait]
impl FsDriver for DiskFs {
    fn name(&self) -> &str {
        "system"
    }

    async fn stat(&self, path: &str) -> FsResult<Stat> {
        let meta = fs::metadata(path).await?;
        Ok(stat_from_meta(&meta))
    }

    async fn lstat(&self, path: &str) -> FsResult<Stat> {
        let meta = fs::symlink_metadata(path).await?;
        Ok(stat_from_meta(&meta))
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        Ok(fs::rename(from, to).await?)
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_file(path).await?)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> FsResult<Box<dyn FsFile>> {
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .append(flags.contains(OpenFlags::APPEND))
            .create(flags.contains(OpenFlags::CREATE))
            .truncate(flags.contains(OpenFlags::TRUNCATE))
            .create_new(flags.contains(OpenFlags::EXCL));

        let file = options.open(path).await?;
        Ok(Box::new(DiskFile { file }))
    }

    async fn creat(&self, path: &str, mode: u32) -> FsResult<Box<dyn FsFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .await?;
        Ok(Box::new(DiskFile { file }))
    }

    async fn link(&self, from: &str, to: &str) -> FsResult<()> {
        Ok(fs::hard_link(from, to).await?)
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        let target = fs::read_link(path).await?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn symlink(&self, target: &str, link: &str) -> FsResult<()> {
        Ok(fs::symlink(target, link).await?)
    }

    async fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let file = OpenOptions::new().write(true).open(path).await?;
        Ok(file.set_len(len).await?)
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        Ok(fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?)
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || {
            std::os::unix::fs::chown(Path::new(&path), Some(uid), Some(gid))
        })
        .await
        .map_err(|_| FsError::Io(libc::EIO))??;
        Ok(())
    }

    async fn chdir(&self, path: &str) -> FsResult<()> {
        Ok(std::env::set_current_dir(path)?)
    }

    async fn chroot(&self, path: &str) -> FsResult<()> {
        Ok(std::os::unix::fs::chroot(path)?)
    }

    async fn opendir(&self, path: &str) -> FsResult<Box<dyn DirIter>> {
        let inner = fs::read_dir(path).await?;
        Ok(Box::new(DiskDir { inner }))
    }

    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        fs::create_dir(path).await?;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_dir(path).await?)
    }
}
