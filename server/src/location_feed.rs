use std::{net::SocketAddr, sync::Arc};

use tokio::{io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader}, net::{TcpListener, TcpStream}};
use workout_tracker_lib::{location_fix::LocationFix, tracking_session::FixOutcome};

use crate::server_state::ServerState;

/// Longest accepted line, newline included. A real fix is a few hundred bytes.
pub const MAX_LINE_BYTES: u64 = 4096;

/// Accepts location sources on `listener`. Each connection streams one JSON
/// encoded [`LocationFix`] per line.
pub async fn listen(listener: TcpListener, server_state: Arc<ServerState>) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!("Location feed listening on {}", addr),
        Err(err) => tracing::warn!("Location feed listening on unknown address: {}", err),
    }

    loop {
        let Ok((stream, addr)) = listener.accept().await else {
            tracing::error!("Failed to accept connection");
            continue;
        };

        tracing::info!("New location source from {}", addr);

        let server_state = server_state.clone();
        tokio::spawn(async move {
            let res = handle_connection(stream, addr, server_state).await;
            tracing::info!("Location source {} ended with result: {:?}", addr, res);
        });
    }
}

/// Feeds every fix read from the stream into the live session. Returns the
/// number of accepted fixes once the source hangs up.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, server_state: Arc<ServerState>) -> Result<usize, anyhow::Error> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut accepted = 0;

    loop {
        match read_line(&mut reader, &mut line).await? {
            FeedLine::Eof => break,
            FeedLine::TooLong => {
                tracing::warn!("Skipping line over {} bytes from {}", MAX_LINE_BYTES, addr);
                continue;
            }
            FeedLine::Line => {}
        }

        let Some(fix) = parse_fix_line(&line) else {
            continue;
        };

        match server_state.ingest(fix).await {
            FixOutcome::Accepted => accepted += 1,
            outcome => tracing::trace!("Fix from {} dropped: {:?}", addr, outcome),
        }
    }

    Ok(accepted)
}

#[derive(Debug, PartialEq, Eq)]
enum FeedLine {
    Line,
    TooLong,
    Eof,
}

/// Reads one line into `buf`, never buffering more than [`MAX_LINE_BYTES`].
/// The remainder of an oversized line is read and thrown away.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<FeedLine> {
    buf.clear();
    let read = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(FeedLine::Eof);
    }
    if buf.last() == Some(&b'\n') || (read as u64) < MAX_LINE_BYTES {
        return Ok(FeedLine::Line);
    }

    loop {
        buf.clear();
        let read = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', buf).await?;
        if read == 0 || buf.last() == Some(&b'\n') {
            buf.clear();
            return Ok(FeedLine::TooLong);
        }
    }
}

/// Blank lines are keep-alives. Malformed lines, including ones that are not
/// UTF-8, are logged and skipped so a single bad sample does not end the feed.
pub fn parse_fix_line(line: &[u8]) -> Option<LocationFix> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_slice(line) {
        Ok(fix) => Some(fix),
        Err(err) => {
            tracing::warn!("Skipping malformed fix {:?}: {}", String::from_utf8_lossy(line), err);
            None
        }
    }
}
