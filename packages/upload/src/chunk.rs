//! Splits a file into an ordered sequence of fixed-size chunks.
//!
//! Reads are incremental: only one chunk is held in memory at a time, and
//! the file handle is dropped as soon as the last chunk is produced. The
//! SHA-256 of the file is accumulated from the chunks as they are read.

use std::path::Path;

use dam_upload_models::Chunk;
use futures::Stream;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::UploadError;

/// Number of chunks needed for `file_size` bytes. Always at least one.
#[must_use]
pub const fn chunk_count(file_size: u64, max_chunk_size: usize) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(max_chunk_size as u64)
    }
}

/// Single-pass reader producing indexed [`Chunk`]s from a file.
pub struct ChunkSource {
    file: Option<File>,
    hasher: Sha256,
    max_chunk_size: usize,
    file_size: u64,
    remaining: u64,
    chunk_count: u32,
    first_index: u32,
    emitted: u32,
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSource")
            .field("file_size", &self.file_size)
            .field("chunk_count", &self.chunk_count)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

impl ChunkSource {
    /// Opens `path` for chunked reading. Indexes start at `first_index`.
    ///
    /// # Errors
    ///
    /// * [`UploadError::Io`] if the file cannot be opened or its size read,
    ///   or if `max_chunk_size` is zero
    /// * [`UploadError::Io`] if the file needs more chunks than fit in a
    ///   `u32`
    pub async fn open(
        path: &Path,
        max_chunk_size: usize,
        first_index: u32,
    ) -> Result<Self, UploadError> {
        if max_chunk_size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "chunk size must be positive",
            )
            .into());
        }

        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_count = u32::try_from(chunk_count(file_size, max_chunk_size)).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is too large for {max_chunk_size}-byte chunks", path.display()),
            )
        })?;

        log::debug!(
            "Opened {} ({file_size} bytes, {chunk_count} chunks of up to {max_chunk_size} bytes)",
            path.display()
        );

        Ok(Self {
            file: Some(file),
            hasher: Sha256::new(),
            max_chunk_size,
            file_size,
            remaining: file_size,
            chunk_count,
            first_index,
            emitted: 0,
        })
    }

    /// Size of the file when it was opened.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Total number of chunks this source will produce.
    #[must_use]
    pub const fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Reads the next chunk, or `None` once every chunk has been produced.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Io`] if a read fails or the file is shorter
    /// than it was when opened. Chunks already returned stay valid; the
    /// caller decides whether to abandon the upload.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, UploadError> {
        if self.emitted >= self.chunk_count {
            return Ok(None);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let want = self.remaining.min(self.max_chunk_size as u64);
        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut bytes).await?;

        if (bytes.len() as u64) < want {
            self.file = None;
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file ended early: expected {} more bytes",
                    self.remaining
                ),
            )
            .into());
        }

        self.hasher.update(&bytes);
        let index = self.first_index + self.emitted;
        self.emitted += 1;
        self.remaining -= want;
        if self.emitted == self.chunk_count {
            self.file = None;
        }

        Ok(Some(Chunk { index, bytes }))
    }

    /// Lowercase hex SHA-256 of every byte read, once the last chunk has
    /// been produced. `None` while chunks remain.
    #[must_use]
    pub fn sha256(&self) -> Option<String> {
        (self.emitted == self.chunk_count).then(|| hex::encode(self.hasher.clone().finalize()))
    }

    /// Streams the remaining chunks. The source stays usable afterwards so
    /// the digest can be read once the stream is drained.
    pub fn chunks(&mut self) -> impl Stream<Item = Result<Chunk, UploadError>> + Send + '_ {
        futures::stream::try_unfold(self, |source| async move {
            Ok(source.next_chunk().await?.map(|chunk| (chunk, source)))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;

    use super::*;
    use crate::hash::sha256_hex;

    fn write_file(dir: &tempfile::TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("asset.bin");
        #[allow(clippy::cast_possible_truncation)]
        let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn chunk_count_rounds_up_with_minimum_one() {
        assert_eq!(chunk_count(0, 5), 1);
        assert_eq!(chunk_count(1, 5), 1);
        assert_eq!(chunk_count(5, 5), 1);
        assert_eq!(chunk_count(6, 5), 2);
        assert_eq!(chunk_count(12 * 1024 * 1024, 5 * 1024 * 1024), 3);
    }

    #[tokio::test]
    async fn chunks_reassemble_into_original_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 23);

        let mut source = ChunkSource::open(&path, 5, 0).await.unwrap();
        assert_eq!(source.chunk_count(), 5);
        let chunks: Vec<Chunk> = source.chunks().try_collect().await.unwrap();

        let indexes: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert!(chunks[..4].iter().all(|c| c.len() == 5));
        assert_eq!(chunks[4].len(), 3);

        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.bytes).collect();
        assert_eq!(joined, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn staged_indexes_start_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 10);

        let mut source = ChunkSource::open(&path, 4, 1).await.unwrap();
        let chunks: Vec<Chunk> = source.chunks().try_collect().await.unwrap();
        let indexes: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_file_yields_one_empty_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 0);

        let mut source = ChunkSource::open(&path, 5, 0).await.unwrap();
        let chunk = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.index, 0);
        assert!(chunk.is_empty());
        assert!(source.next_chunk().await.unwrap().is_none());
        assert!(source.file.is_none());
        assert_eq!(source.sha256().unwrap(), sha256_hex(b""));
    }

    #[tokio::test]
    async fn digest_covers_exactly_the_bytes_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 23);

        let mut source = ChunkSource::open(&path, 5, 0).await.unwrap();
        let first = source.next_chunk().await.unwrap().unwrap();
        assert!(source.sha256().is_none());

        let mut read = first.bytes;
        let rest: Vec<Chunk> = source.chunks().try_collect().await.unwrap();
        for chunk in rest {
            read.extend(chunk.bytes);
        }

        assert_eq!(source.sha256().unwrap(), sha256_hex(&read));
        assert_eq!(read, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChunkSource::open(&dir.path().join("nope"), 5, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 3);
        assert!(ChunkSource::open(&path, 0, 0).await.is_err());
    }
}
