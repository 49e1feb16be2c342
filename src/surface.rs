//! Line-oriented display surface
//!
//! Reads one inbound message per line and writes every outbound message as a
//! single JSON line. A host (editor extension, terminal, test) sits on the
//! other end of the two streams.

use crate::commands::{CommandHandler, InboundMessage};
use crate::session::GenerationReport;
use crate::sink::OutboundMessage;

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::warn;

async fn write_message<W>(output: &mut W, message: &OutboundMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

/// Serve the surface until `input` ends.
///
/// At end of input the running generation, if any, is allowed to finish and
/// its remaining messages are written before returning.
pub async fn run<R, W>(
    handler: CommandHandler,
    input: R,
    mut outbound: UnboundedReceiver<OutboundMessage>,
    mut output: W,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut in_flight: Option<JoinHandle<GenerationReport>> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match InboundMessage::parse_line(&line) {
                    Ok(Some(message)) => {
                        if let Some(handle) = handler.handle(message).await {
                            in_flight = Some(handle);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("unreadable message: {}", e),
                }
            }
            Some(message) = outbound.recv() => write_message(&mut output, &message).await?,
        }
    }

    if let Some(handle) = in_flight.take() {
        if let Err(e) = handle.await {
            warn!("generation task ended abnormally: {}", e);
        }
    }

    while let Ok(message) = outbound.try_recv() {
        write_message(&mut output, &message).await?;
    }
    output.flush().await
}
