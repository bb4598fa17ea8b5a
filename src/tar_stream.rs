//! Site archives: tar inside zstd, streamed through a bounded pipe
//!
//! The archive for an upload is produced on its own thread while the transport
//! sends it, so a site never has to fit in memory. The pipe holds a single
//! chunk; a slow receiver stalls the walk.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::Stream;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::thread;
use tar::{Builder, EntryType, Header};
use tokio::sync::mpsc;

use crate::fs_enum::{walk_tree, EntryKind, TreeEntry};
use crate::hash::{git_blob_sha256, ContentHash, MustEmbedSet, INCREMENTAL_SIZE_THRESHOLD};

pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar+zstd";
pub const WHITEOUT_CONTENT_TYPE: &str = "application/x-tar";

/// Chunks in flight between the encoder thread and the transport
const PIPE_DEPTH: usize = 1;
/// Size of each chunk in bytes
const CHUNK_SIZE: usize = 64 * 1024;
/// Longest link target that fits the ustar header field
const LINK_NAME_FIELD: usize = 100;

/// How a directory is turned into an archive
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Prepended to every entry name; empty or ending in `/`
    pub path_prefix: String,
    /// Replace large files with blob placeholders
    pub incremental: bool,
    /// Files strictly larger than this are candidates for placeholders
    pub size_threshold: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            path_prefix: String::new(),
            incremental: false,
            size_threshold: INCREMENTAL_SIZE_THRESHOLD,
        }
    }
}

impl ArchiveOptions {
    /// Hash of `data` if it should be sent as a placeholder
    fn elided_hash(&self, data: &[u8], must_embed: &MustEmbedSet) -> Option<ContentHash> {
        if !self.incremental || data.len() as u64 <= self.size_threshold {
            return None;
        }
        let hash = git_blob_sha256(data);
        if must_embed.contains(&hash) {
            None
        } else {
            Some(hash)
        }
    }
}

/// Normalize a user supplied site path into an archive prefix ("" or "a/b/")
pub fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Archive name for a walked entry, or None for the unprefixed root
fn archive_name(entry: &TreeEntry, prefix: &str) -> Option<String> {
    if entry.is_root() {
        if prefix.is_empty() {
            None
        } else {
            Some(prefix.trim_end_matches('/').to_string())
        }
    } else {
        Some(format!("{}{}", prefix, entry.path))
    }
}

fn base_header(entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(0);
    header
}

/// Symlink entry whose target is stored byte for byte.
///
/// `Builder::append_link` normalizes the target as a path (`./a//b/` becomes
/// `a/b`), so short targets go straight into the header field. Longer ones need
/// the GNU long-link extension, which only `append_link` writes.
fn append_symlink<W: Write>(builder: &mut Builder<W>, name: &str, target: &str) -> io::Result<()> {
    let mut header = base_header(EntryType::Symlink, 0o777);
    if target.len() <= LINK_NAME_FIELD {
        header.set_link_name_literal(target)?;
        builder.append_data(&mut header, name, io::empty())
    } else {
        builder.append_link(&mut header, name, target)
    }
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    entry: &TreeEntry,
    options: &ArchiveOptions,
    must_embed: &MustEmbedSet,
) -> Result<()> {
    let Some(name) = archive_name(entry, &options.path_prefix) else {
        return Ok(());
    };

    match entry.kind {
        EntryKind::Directory => {
            let mut header = base_header(EntryType::Directory, 0o755);
            builder
                .append_data(&mut header, format!("{}/", name), io::empty())
                .with_context(|| format!("failed to add directory {}", name))?;
        }
        EntryKind::RegularFile => {
            let data = entry.read_content()?;
            if let Some(hash) = options.elided_hash(&data, must_embed) {
                append_symlink(builder, &name, &hash.blob_link())
                    .with_context(|| format!("failed to add placeholder {}", name))?;
            } else {
                let mut header = base_header(EntryType::Regular, 0o644);
                header.set_size(data.len() as u64);
                builder
                    .append_data(&mut header, &name, data.as_slice())
                    .with_context(|| format!("failed to add file {}", name))?;
            }
        }
        EntryKind::Symlink => {
            let target = entry.link_target.as_deref().unwrap_or_default();
            append_symlink(builder, &name, target)
                .with_context(|| format!("failed to add symlink {}", name))?;
        }
    }
    Ok(())
}

/// Write the compressed archive of `root` into `writer`.
///
/// The tar trailer is written before the zstd frame is finished; the writer is
/// handed back once both layers are closed.
pub fn write_archive<W: Write>(
    writer: W,
    root: &Path,
    options: &ArchiveOptions,
    must_embed: &MustEmbedSet,
) -> Result<W> {
    let encoder = zstd::stream::write::Encoder::new(writer, zstd::DEFAULT_COMPRESSION_LEVEL)
        .context("failed to initialize zstd encoder")?;
    let mut builder = Builder::new(encoder);

    for entry in walk_tree(root) {
        append_entry(&mut builder, &entry?, options, must_embed)?;
    }

    let encoder = builder.into_inner().context("failed to finish tar archive")?;
    encoder.finish().context("failed to finish zstd stream")
}

/// Single-entry uncompressed archive that deletes `path` and everything below it
pub fn make_whiteout(path: &str) -> Result<Vec<u8>> {
    let name = normalize_prefix(path);
    anyhow::ensure!(!name.is_empty(), "whiteout needs a non-empty path");

    let mut builder = Builder::new(Vec::new());
    let mut header = base_header(EntryType::Char, 0);
    builder
        .append_data(&mut header, &name, io::empty())
        .with_context(|| format!("failed to add whiteout {}", name))?;
    Ok(builder.into_inner()?)
}

type Chunk = io::Result<Bytes>;

/// Channel writer that sends data through the pipe in fixed-size chunks
struct ChannelWriter {
    tx: mpsc::Sender<Chunk>,
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Chunk>, chunk_size: usize) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
            self.tx
                .blocking_send(Ok(Bytes::from(chunk)))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver closed"))?;
        }
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let mut remaining = buf;

        while !remaining.is_empty() {
            let available = self.chunk_size - self.buffer.len();
            let to_write = remaining.len().min(available);

            self.buffer.extend_from_slice(&remaining[..to_write]);
            written += to_write;
            remaining = &remaining[to_write..];

            if self.buffer.len() >= self.chunk_size {
                self.flush_buffer()?;
            }
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()
    }
}

/// Receiving end of an archive being produced on another thread.
///
/// Ends with `None` after a clean finish, or yields the producer's error as
/// its last item.
pub struct ArchiveStream {
    rx: mpsc::Receiver<Chunk>,
}

/// Start encoding `root` on a new thread and return the stream of its bytes
pub fn stream_archive(
    root: PathBuf,
    options: ArchiveOptions,
    must_embed: MustEmbedSet,
) -> ArchiveStream {
    let (tx, rx) = mpsc::channel::<Chunk>(PIPE_DEPTH);

    thread::spawn(move || {
        let writer = ChannelWriter::new(tx.clone(), CHUNK_SIZE);
        let result = write_archive(writer, &root, &options, &must_embed)
            .and_then(|mut writer| writer.flush().context("failed to send archive"));
        if let Err(err) = result {
            // Dropping the sender alone would look like a clean end of stream.
            let _ = tx.blocking_send(Err(io::Error::other(format!("{:#}", err))));
        }
    });

    ArchiveStream { rx }
}

impl ArchiveStream {
    /// Gather the whole archive; only sensible for tests and small sites
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
