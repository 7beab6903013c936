//! STRATA - SSTable File Handles
//! An abstract asynchronous file handle, a local-disk implementation of it,
//! and the instrumented wrapper that attributes every open, close, read and
//! write to the shard's [`SstableStats`].
//!
//! The wrapper changes no I/O semantics: every call is forwarded with the
//! same arguments and its result or error is returned untouched.

use std::io;
use std::ops::BitOr;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use super::stats::SstableStats;

/// Flags a file was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const CREATE: OpenFlags = OpenFlags(0x04);
    pub const TRUNCATE: OpenFlags = OpenFlags(0x08);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0x10);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Write-only or read-write.
    pub fn is_writable(self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Metadata returned by [`FileHandle::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One entry returned by [`FileHandle::list_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Asynchronous positioned file I/O.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Read up to `len` bytes at `offset`; may return fewer.
    async fn read(&self, offset: u64, len: usize) -> io::Result<Bytes>;

    /// Write `buf` at `offset`, returning the number of bytes written.
    async fn write(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    async fn flush(&self) -> io::Result<()>;

    async fn truncate(&self, len: u64) -> io::Result<()>;

    /// Hint that the range is no longer needed.
    async fn discard(&self, offset: u64, len: u64) -> io::Result<()>;

    /// Reserve space for the range.
    async fn allocate(&self, offset: u64, len: u64) -> io::Result<()>;

    async fn size(&self) -> io::Result<u64>;

    async fn stat(&self) -> io::Result<FileStat>;

    async fn close(&self) -> io::Result<()>;

    /// A second handle on the same open file.
    fn dup(&self) -> io::Result<Box<dyn FileHandle>>;

    /// Entries of the directory this handle refers to.
    async fn list_directory(&self) -> io::Result<Vec<DirEntry>>;

    /// Read `len` bytes at `offset`, stopping early only at end of file.
    async fn read_bulk(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

/// Run blocking file-system work off the async workers.
async fn blocking<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// A file on the local file system.
pub struct LocalFile {
    file: Arc<std::fs::File>,
    path: PathBuf,
}

impl LocalFile {
    /// Open `path` with `flags`.
    pub async fn open(path: impl AsRef<Path>, flags: OpenFlags) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = std::fs::OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ) || !flags.is_writable())
            .write(flags.is_writable())
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        if flags.contains(OpenFlags::EXCLUSIVE) {
            options.create_new(true);
        } else {
            options.create(flags.contains(OpenFlags::CREATE));
        }

        let open_path = path.clone();
        let file = blocking(move || options.open(&open_path)).await?;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_at_most(file: &std::fs::File, offset: u64, len: usize, fill: bool) -> io::Result<Bytes> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
            if !fill {
                break;
            }
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl FileHandle for LocalFile {
    async fn read(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let file = self.file.clone();
        blocking(move || Self::read_at_most(&file, offset, len, false)).await
    }

    async fn write(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let file = self.file.clone();
        let data = buf.to_vec();
        blocking(move || {
            file.write_all_at(&data, offset)?;
            Ok(data.len())
        })
        .await
    }

    async fn flush(&self) -> io::Result<()> {
        let file = self.file.clone();
        blocking(move || file.sync_data()).await
    }

    async fn truncate(&self, len: u64) -> io::Result<()> {
        let file = self.file.clone();
        blocking(move || file.set_len(len)).await
    }

    async fn discard(&self, _offset: u64, _len: u64) -> io::Result<()> {
        // Advisory only; the local backend keeps the bytes.
        Ok(())
    }

    async fn allocate(&self, offset: u64, len: u64) -> io::Result<()> {
        let file = self.file.clone();
        blocking(move || {
            let wanted = offset + len;
            if file.metadata()?.len() < wanted {
                file.set_len(wanted)?;
            }
            Ok(())
        })
        .await
    }

    async fn size(&self) -> io::Result<u64> {
        let file = self.file.clone();
        blocking(move || Ok(file.metadata()?.len())).await
    }

    async fn stat(&self) -> io::Result<FileStat> {
        let file = self.file.clone();
        blocking(move || {
            let meta = file.metadata()?;
            Ok(FileStat {
                size: meta.len(),
                is_dir: meta.is_dir(),
                modified: meta.modified().ok(),
            })
        })
        .await
    }

    async fn close(&self) -> io::Result<()> {
        // The descriptor is released when the last handle drops.
        Ok(())
    }

    fn dup(&self) -> io::Result<Box<dyn FileHandle>> {
        Ok(Box::new(LocalFile {
            file: Arc::new(self.file.try_clone()?),
            path: self.path.clone(),
        }))
    }

    async fn list_directory(&self) -> io::Result<Vec<DirEntry>> {
        let path = self.path.clone();
        blocking(move || {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let kind = if file_type.is_dir() {
                    EntryKind::Directory
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    kind,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn read_bulk(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let file = self.file.clone();
        blocking(move || Self::read_at_most(&file, offset, len, true)).await
    }
}

/// A file handle that reports its activity to shard statistics.
pub struct InstrumentedFile {
    inner: Box<dyn FileHandle>,
    flags: OpenFlags,
    stats: Arc<SstableStats>,
}

impl InstrumentedFile {
    /// Wrap an already-open handle; counts as one open with `flags`.
    pub fn new(inner: Box<dyn FileHandle>, flags: OpenFlags, stats: Arc<SstableStats>) -> Self {
        stats.submit_open(flags);
        Self {
            inner,
            flags,
            stats,
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }
}

#[async_trait]
impl FileHandle for InstrumentedFile {
    async fn read(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let _in_flight = self.stats.start_read();
        let data = self.inner.read(offset, len).await?;
        self.stats.record_bytes_read(data.len());
        Ok(data)
    }

    async fn write(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let _in_flight = self.stats.start_write();
        let written = self.inner.write(offset, buf).await?;
        self.stats.record_bytes_written(written);
        Ok(written)
    }

    async fn flush(&self) -> io::Result<()> {
        self.inner.flush().await
    }

    async fn truncate(&self, len: u64) -> io::Result<()> {
        self.inner.truncate(len).await
    }

    async fn discard(&self, offset: u64, len: u64) -> io::Result<()> {
        self.inner.discard(offset, len).await
    }

    async fn allocate(&self, offset: u64, len: u64) -> io::Result<()> {
        self.inner.allocate(offset, len).await
    }

    async fn size(&self) -> io::Result<u64> {
        self.inner.size().await
    }

    async fn stat(&self) -> io::Result<FileStat> {
        self.inner.stat().await
    }

    async fn close(&self) -> io::Result<()> {
        self.inner.close().await?;
        self.stats.submit_close(self.flags);
        Ok(())
    }

    fn dup(&self) -> io::Result<Box<dyn FileHandle>> {
        let clone = self.inner.dup()?;
        Ok(Box::new(InstrumentedFile::new(
            clone,
            self.flags,
            self.stats.clone(),
        )))
    }

    async fn list_directory(&self) -> io::Result<Vec<DirEntry>> {
        self.inner.list_directory().await
    }

    async fn read_bulk(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let _in_flight = self.stats.start_read();
        let data = self.inner.read_bulk(offset, len).await?;
        self.stats.record_bytes_read(data.len());
        Ok(data)
    }
}

/// Open an SSTable component file on local disk, instrumented.
pub async fn open_sstable_file(
    stats: &Arc<SstableStats>,
    path: impl AsRef<Path>,
    flags: OpenFlags,
) -> io::Result<InstrumentedFile> {
    let file = LocalFile::open(path, flags).await?;
    Ok(InstrumentedFile::new(Box::new(file), flags, stats.clone()))
}

/// Make entry creations, renames and removals in `dir` durable.
pub async fn sync_directory(dir: impl AsRef<Path>) -> io::Result<()> {
    let dir = dir.as_ref().to_path_buf();
    blocking(move || std::fs::File::open(&dir)?.sync_all()).await
}
