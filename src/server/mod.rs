//! Line-oriented question answering over stdio
//!
//! Each input line is a JSON request `{"msg": "<question>"}`; each output line
//! is the answer (or an `Error: ...` message) encoded as a JSON string, so
//! multi-line answers never break the one-line-per-response framing.


use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::chain::{ChainStage, RetrievalChain};

/// A single question
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub msg: String,
}

/// Serves a [`RetrievalChain`] to one client
pub struct AnswerServer {
    chain: Arc<RetrievalChain>,
}

impl AnswerServer {
    #[inline]
    pub fn new(chain: Arc<RetrievalChain>) -> Self {
        Self { chain }
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!(
            "Answering questions over stdio from index {}",
            self.chain.index_name()
        );
        let served = self
            .serve(BufReader::new(io::stdin()), io::stdout())
            .await?;
        info!("Server stopped after {} requests", served);
        Ok(())
    }

    /// Answer every request read from `reader` until EOF, returning how many
    /// requests were handled
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut served = 0;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let response = self.handle_line(line).await;
                    send_line(&mut writer, &response).await?;
                    served += 1;
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }
        Ok(served)
    }

    /// Response text for one raw request line
    #[inline]
    pub async fn handle_line(&self, line: &str) -> String {
        match serde_json::from_str::<AskRequest>(line) {
            Ok(request) => self.chain.respond(&request.msg).await,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                format!(
                    "Error: {} failed: invalid request: {}",
                    ChainStage::Received,
                    e
                )
            }
        }
    }
}

async fn send_line<W>(writer: &mut W, response: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
