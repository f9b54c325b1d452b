//! 📁 FileSink: query output written to a file on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
};
use tracing::trace;

use crate::backends::Sink;

/// 📁 A BufWriter around a tokio `File`. Writes what it is given, in order.
///
/// ⚠️ `File::create` truncates if the file exists. No warning. No backup. Just gone.
#[derive(Debug)]
pub struct FileSink {
    file_buf: io::BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    /// 🚀 Creates (or truncates) the output file.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_handle = File::create(&path).await.with_context(|| {
            format!(
                "💀 The output file '{}' could not be created. \
                 We stared at the path. The path stared back. \
                 One of us was wrong about whether the parent directory existed.",
                path.display()
            )
        })?;
        Ok(Self {
            file_buf: io::BufWriter::new(file_handle),
            path,
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        trace!(
            "📬 {} bytes walked into the file sink, writing them all down",
            payload.len()
        );
        self.file_buf
            .write_all(&payload)
            .await
            .with_context(|| format!("💀 failed writing to '{}'", self.path.display()))
    }

    /// 🗑️ Flush the BufWriter. Without this the last writes might never leave the buffer.
    async fn close(&mut self) -> Result<()> {
        trace!("🎬 final flush of '{}'", self.path.display());
        self.file_buf.flush().await.with_context(|| {
            format!(
                "💀 Error flushing '{}'. The buffer held its data to the very end, \
                 and the disk said no.",
                self.path.display()
            )
        })
    }
}
