//! 🖨️ StdoutSink: query output on standard out. Logs and progress go to stderr, so
//! stdout carries nothing but results and stays pipeable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{self, AsyncWriteExt, BufWriter, Stdout};

use crate::backends::Sink;

#[derive(Debug)]
pub struct StdoutSink {
    out: BufWriter<Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: BufWriter::new(io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.out
            .write_all(&payload)
            .await
            .context("💀 failed writing to stdout (is the pipe closed?)")
    }

    async fn close(&mut self) -> Result<()> {
        self.out.flush().await.context("💀 failed flushing stdout")
    }
}
