//! Spill-to-disk body storage.
//!
//! Grounded on `original_source/mhttp/files.py` (`TempFileFactory`,
//! `TempFileSmall`, `TempFileBig`) and `utils/tempfiles.py` for temp-path
//! naming. A [`TempFileFactory`] accumulates bytes in memory until
//! [`TempFileLimits::max_mem_size`](crate::limits::TempFileLimits) is
//! crossed, at which point it opens a temp file and everything after
//! (including what was already buffered) goes to disk.

use crate::limits::TempFileLimits;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// An opaque, already-finalized request or upload body: either held
/// entirely in memory or backed by a temp file on disk. `Disk` owns its
/// backing file exclusively; it is removed when the last clone of the
/// `Body` is dropped.
#[derive(Debug, Clone)]
pub enum Body {
    Memory(Arc<Vec<u8>>),
    Disk(Arc<tempfile::TempPath>, u64),
}

impl Body {
    pub fn empty() -> Self {
        Body::Memory(Arc::new(Vec::new()))
    }

    pub fn size(&self) -> u64 {
        match self {
            Body::Memory(v) => v.len() as u64,
            Body::Disk(_, size) => *size,
        }
    }

    /// Reads the whole body into memory regardless of backing.
    pub async fn data(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Body::Memory(v) => Ok((**v).clone()),
            Body::Disk(path, _) => tokio::fs::read(path.as_ref()).await,
        }
    }

    /// Opens the body for sequential reading from its start.
    pub async fn open_stream(&self) -> std::io::Result<BodyStream> {
        match self {
            Body::Memory(v) => Ok(BodyStream::Memory(std::io::Cursor::new(Arc::clone(v)))),
            Body::Disk(path, _) => {
                let file = tokio::fs::File::open(path.as_ref()).await?;
                Ok(BodyStream::Disk(file))
            }
        }
    }

    /// Moves (renames, falling back to copy+delete across filesystems)
    /// the backing storage to `dest_path`. For an in-memory body this is
    /// a plain write.
    pub async fn move_to(&self, dest_path: &std::path::Path) -> std::io::Result<()> {
        match self {
            Body::Memory(v) => tokio::fs::write(dest_path, v.as_slice()).await,
            Body::Disk(path, _) => match tokio::fs::rename(path.as_ref(), dest_path).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    tokio::fs::copy(path.as_ref(), dest_path).await?;
                    tokio::fs::remove_file(path.as_ref()).await
                }
            },
        }
    }

    pub async fn copy_to(&self, dest_path: &std::path::Path) -> std::io::Result<()> {
        match self {
            Body::Memory(v) => tokio::fs::write(dest_path, v.as_slice()).await,
            Body::Disk(path, _) => {
                tokio::fs::copy(path.as_ref(), dest_path).await?;
                Ok(())
            }
        }
    }
}

/// A readable stream over a [`Body`], hiding whether it's memory- or
/// disk-backed behind one `AsyncRead` implementation.
pub enum BodyStream {
    Memory(std::io::Cursor<Arc<Vec<u8>>>),
    Disk(tokio::fs::File),
}

impl AsyncRead for BodyStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this {
            BodyStream::Memory(cursor) => {
                let slice: &[u8] = cursor.get_ref();
                let pos = cursor.position() as usize;
                let remaining = &slice[pos.min(slice.len())..];
                let n = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..n]);
                cursor.set_position((pos + n) as u64);
                std::task::Poll::Ready(Ok(()))
            }
            BodyStream::Disk(file) => std::pin::Pin::new(file).poll_read(cx, buf),
        }
    }
}

impl BodyStream {
    /// Seeks to `offset` from the start.
    pub async fn seek_to(&mut self, offset: u64) -> std::io::Result<()> {
        match self {
            BodyStream::Memory(cursor) => {
                cursor.set_position(offset);
                Ok(())
            }
            BodyStream::Disk(file) => {
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                Ok(())
            }
        }
    }
}

/// Accumulates request-body bytes, transparently spilling to a temp file
/// once [`TempFileLimits::max_mem_size`] is exceeded.
pub struct TempFileFactory {
    limits: TempFileLimits,
    content: Vec<u8>,
    disk: Option<(tempfile::TempPath, tokio::fs::File)>,
    size: u64,
}

impl TempFileFactory {
    pub fn new(limits: TempFileLimits) -> Self {
        Self {
            limits,
            content: Vec::new(),
            disk: None,
            size: 0,
        }
    }

    /// Appends received bytes, opening a temp file and flushing the
    /// in-memory buffer to it the first time the memory threshold is
    /// crossed.
    pub async fn append(&mut self, received: &[u8]) -> std::io::Result<()> {
        if let Some((_, file)) = self.disk.as_mut() {
            file.write_all(received).await?;
            self.size += received.len() as u64;
            return Ok(());
        }
        if self.content.len() + received.len() > self.limits.max_mem_size {
            let named = tempfile::NamedTempFile::new()?;
            let (std_file, path) = named.into_parts();
            let mut file = tokio::fs::File::from_std(std_file);
            file.write_all(&self.content).await?;
            file.write_all(received).await?;
            self.size = self.content.len() as u64 + received.len() as u64;
            self.content.clear();
            self.disk = Some((path, file));
        } else {
            self.content.extend_from_slice(received);
            self.size += received.len() as u64;
        }
        Ok(())
    }

    /// Finalizes accumulation into a [`Body`]. No further `append` calls
    /// are meaningful afterward.
    pub async fn finalize(mut self) -> std::io::Result<Body> {
        if let Some((path, mut file)) = self.disk.take() {
            file.flush().await?;
            return Ok(Body::Disk(Arc::new(path), self.size));
        }
        Ok(Body::Memory(Arc::new(std::mem::take(&mut self.content))))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Closes and unlinks any partial temp file, discards buffered memory,
    /// and resets the factory as if newly constructed. Used to abandon an
    /// in-progress body (e.g. an ingestion error) without finalizing it;
    /// `finalize` is the normal, completing counterpart.
    pub async fn clear(&mut self) {
        self.content.clear();
        self.size = 0;
        if let Some((path, file)) = self.disk.take() {
            drop(file);
            let _ = path.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stays_in_memory_below_threshold() {
        let limits = TempFileLimits { max_mem_size: 1024 };
        let mut factory = TempFileFactory::new(limits);
        factory.append(b"hello").await.unwrap();
        let body = factory.finalize().await.unwrap();
        assert!(matches!(body, Body::Memory(_)));
        assert_eq!(body.size(), 5);
    }

    #[tokio::test]
    async fn spills_to_disk_above_threshold() {
        let limits = TempFileLimits { max_mem_size: 4 };
        let mut factory = TempFileFactory::new(limits);
        factory.append(b"hello world").await.unwrap();
        let body = factory.finalize().await.unwrap();
        assert!(matches!(body, Body::Disk(..)));
        let data = body.data().await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn open_stream_reads_full_content_for_both_backings() {
        let limits = TempFileLimits { max_mem_size: 4 };
        let mut factory = TempFileFactory::new(limits);
        factory.append(b"spill me to disk please").await.unwrap();
        let body = factory.finalize().await.unwrap();
        let mut stream = body.open_stream().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"spill me to disk please");
    }
}
