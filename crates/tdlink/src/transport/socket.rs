use std::path::Path;
use std::sync::mpsc;

use futures_util::{SinkExt, StreamExt};
use tdlink_protocol::MAX_LINE_BYTES;
use tokio::net::UnixStream;
use tokio::sync::mpsc as async_mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::ChannelTransport;
use crate::error::TransportError;

/// Connect to an engine bridge speaking JSON lines on a Unix socket.
///
/// Two tasks pump the socket: the reader forwards each line to the dispatch
/// loop and closes the receive side on EOF; the writer drains submissions
/// and exits once the transport is dropped. Must be called inside a Tokio
/// runtime.
pub async fn connect(socket_path: &Path) -> Result<ChannelTransport, TransportError> {
    let stream = UnixStream::connect(socket_path).await?;
    info!(socket = %socket_path.display(), "connected to engine bridge");
    let (read_half, write_half) = stream.into_split();

    let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut writer = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>();
    let (out_tx, mut out_rx) = async_mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(async move {
        while let Some(line) = reader.next().await {
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if in_tx.send(line.into_bytes()).is_err() {
                        break;
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_BYTES, "bridge line too long, skipped");
                }
                Err(LinesCodecError::Io(err)) => {
                    warn!(error = %err, "bridge read failed");
                    break;
                }
            }
        }
        debug!("bridge reader finished");
    });

    tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            let line = match String::from_utf8(payload) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "dropping non-utf8 submission");
                    continue;
                }
            };
            if let Err(err) = writer.send(line).await {
                warn!(error = %err, "bridge write failed");
                break;
            }
        }
        debug!("bridge writer finished");
    });

    Ok(ChannelTransport::new(out_tx, in_rx)
        .execute_unsupported("execute is not available over the bridge socket"))
}
