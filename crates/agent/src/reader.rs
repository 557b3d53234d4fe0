// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offset-tracked incremental line extraction from one open log file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Initial positioning for a freshly opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPos {
    /// Start reading at offset zero.
    Head,
    /// Start reading at the current end of file.
    Tail,
}

/// An open log file with a tracked byte offset and line-framing buffers.
pub struct TailFile {
    file: File,
    pub path: PathBuf,
    pub position: u64,
    read_buf: Vec<u8>,
    cont_buf: Vec<u8>,
}

impl TailFile {
    /// Open `path` and seek according to `pos`.
    pub fn open(path: &Path, pos: SeekPos, read_buffer_size: usize) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let position = match pos {
            SeekPos::Head => file.seek(SeekFrom::Start(0))?,
            SeekPos::Tail => {
                let size = file.metadata()?.len();
                file.seek(SeekFrom::Start(size))?
            }
        };
        debug!(path = %path.display(), position, "opened file for tailing");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            position,
            read_buf: vec![0; read_buffer_size],
            cont_buf: Vec::new(),
        })
    }

    /// Rewind to the start when the file shrank below the tracked offset.
    pub fn check_truncated(&mut self) -> io::Result<()> {
        let size = self.file.metadata()?.len();
        if size < self.position {
            self.position = self.file.seek(SeekFrom::Start(0))?;
            info!(path = %self.path.display(), "file was truncated, rewound to start");
        }
        Ok(())
    }

    /// Read the next batch of complete lines, without their terminators.
    ///
    /// Returns `Ok(None)` at end of file. A chunk containing no newline is
    /// held in the continuation buffer and reading continues, so a line
    /// longer than the read buffer is emitted only once its terminator
    /// arrives. The trailing partial line of a chunk carries over to the
    /// next call the same way.
    pub fn read_lines(&mut self) -> io::Result<Option<Vec<Vec<u8>>>> {
        loop {
            let n = self.file.read(&mut self.read_buf)?;
            if n == 0 {
                return Ok(None);
            }
            self.position += n as u64;
            let chunk = &self.read_buf[..n];

            let mut batch = std::mem::take(&mut self.cont_buf);
            if chunk[n - 1] == b'\n' {
                batch.extend_from_slice(&chunk[..n - 1]);
            } else if let Some(last) = chunk.iter().rposition(|&b| b == b'\n') {
                batch.extend_from_slice(&chunk[..last]);
                self.cont_buf = chunk[last + 1..].to_vec();
            } else {
                // No terminator yet: keep accumulating.
                batch.extend_from_slice(chunk);
                self.cont_buf = batch;
                continue;
            }
            return Ok(Some(batch.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect()));
        }
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
