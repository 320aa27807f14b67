//! Assembly of layer contents into one multi-document YAML file.

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Written between consecutive blocks, never before the first or after the last.
pub const SEPARATOR: &[u8] = b"\n---\n";

/// Streams blocks into a writer, inserting [`SEPARATOR`] between them.
#[derive(Debug)]
pub struct DocumentWriter<W> {
    inner: W,
    blocks: usize,
}

impl<W: AsyncWrite + Unpin> DocumentWriter<W> {
    /// Wrap a destination writer.
    pub fn new(inner: W) -> Self {
        Self { inner, blocks: 0 }
    }

    /// Append one block.
    pub async fn push(&mut self, block: &[u8]) -> std::io::Result<()> {
        if self.blocks > 0 {
            self.inner.write_all(SEPARATOR).await?;
        }
        self.inner.write_all(block).await?;
        self.blocks += 1;
        Ok(())
    }

    /// Number of blocks written so far.
    #[must_use]
    pub fn blocks_written(&self) -> usize {
        self.blocks
    }

    /// Flush and hand back the destination.
    pub async fn finish(mut self) -> std::io::Result<W> {
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

/// Write all `blocks` to `out` in order and return the flushed writer.
pub async fn assemble<W, I, B>(blocks: I, out: W) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut writer = DocumentWriter::new(out);
    for block in blocks {
        writer.push(block.as_ref()).await?;
    }
    writer.finish().await
}
