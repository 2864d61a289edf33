//! Named-pipe output sinks
//!
//! Frames leave this crate through named pipes, one per media kind, so an
//! external muxer can pick them up. Writes are lossy on purpose: when the
//! consumer stalls or goes away the pipe fills up and frames are dropped
//! rather than blocking the pull loops.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::Result;

/// Bytes of audio discarded per second of drift during a flush
const FLUSH_BYTES_PER_SECOND: usize = 320;
/// Flush budget when the caller has no drift estimate
const FLUSH_DEFAULT_BYTES: usize = 7_680;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Pipe location for one stream and media kind
pub fn pipe_path(dir: &Path, stream: &str, kind: MediaKind) -> PathBuf {
    dir.join(format!("{}_{}.pipe", stream, kind.as_str()))
}

fn mkfifo(path: &Path) -> std::io::Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from(ErrorKind::InvalidInput))?;
    // rw-rw-r--, subject to umask
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o664) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::AlreadyExists {
            return Err(err);
        }
    }
    Ok(())
}

fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// One writable pipe endpoint; the fifo is unlinked when the sink drops
pub struct PipeSink {
    path: PathBuf,
    file: File,
}

impl PipeSink {
    /// Create (or reuse) the fifo and open it for lossy writing.
    ///
    /// Opening read+write keeps the fifo alive across consumer restarts and
    /// makes the open itself non-blocking.
    pub fn create(dir: &Path, stream: &str, kind: MediaKind) -> Result<Self> {
        let path = pipe_path(dir, stream, kind);
        mkfifo(&path)?;
        let file = open_nonblocking(&path)?;
        debug!("sink ready at {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one frame. Returns `false` when the pipe was full or the
    /// consumer vanished and the frame was dropped.
    pub fn write(&mut self, data: &[u8]) -> Result<bool> {
        match self.file.write(data) {
            Ok(n) if n == data.len() => Ok(true),
            Ok(_) => Ok(false),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::BrokenPipe) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("could not remove {}: {e}", self.path.display());
            }
        }
    }
}

/// Discard buffered data from a pipe, about `gap` seconds worth.
///
/// With no drift estimate (`gap` of 0) the pipe is drained until empty;
/// with one, a single read of the proportional budget is enough.
pub fn flush(path: &Path, gap: f64) -> Result<()> {
    let mut file = open_nonblocking(path)?;
    let mut drained = 0;

    if gap == 0.0 {
        let mut buf = vec![0u8; FLUSH_DEFAULT_BYTES];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
    } else {
        let budget = ((gap.abs().round() as usize) * FLUSH_BYTES_PER_SECOND).max(1);
        let mut buf = vec![0u8; budget];
        match file.read(&mut buf) {
            Ok(n) => drained = n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }

    if drained > 0 {
        debug!("flushed {drained} bytes from {}", path.display());
    }
    Ok(())
}
