//! Line-delimited stdio transport.
//!
//! Frames are `<JSON>\n`. stdout carries only JSON-RPC frames; all logging
//! goes to stderr (enforced at subscriber setup in `main`). EOF on stdin is
//! the orderly shutdown signal.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::{encode_line, JsonRpcResponse};
use crate::server::McpServer;

/// Serve one MCP session over the process's stdin/stdout.
pub async fn serve(server: McpServer) -> std::io::Result<()> {
    serve_streams(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve one MCP session over arbitrary byte streams.
///
/// Handlers are spawned per request so a slow tool call cannot block the
/// read loop; all outbound frames funnel through a single writer task so
/// concurrent completions never interleave bytes.
pub async fn serve_streams<R, W>(server: McpServer, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = server.new_session();
    let (response_tx, mut response_rx) = mpsc::channel::<JsonRpcResponse>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = response_rx.recv().await {
            let line = encode_line(&response);
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let server = server.clone();
                let session = session.clone();
                let response_tx = response_tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.handle_raw(&session, &line).await {
                        let _ = response_tx.send(response).await;
                    }
                });
            }
            Ok(None) => {
                tracing::info!("stdin closed, shutting down stdio transport");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "stdio read failed");
                break;
            }
        }
    }

    server.close_session(&session);
    // Dropping our sender lets the writer drain in-flight handler output
    // and exit once the last handler finishes.
    drop(response_tx);
    let _ = writer_task.await;
    Ok(())
}
