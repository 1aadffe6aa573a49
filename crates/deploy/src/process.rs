//! Child process output plumbing shared by the node supervisor and the deployment runner.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Capacity of the channel that merges both output streams.
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single line of child process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Forward every line of `reader` into `tx` until EOF.
///
/// Both pipes of a child forward into the same channel, so the receiver sees
/// the lines in the order they were read. Bytes that are not valid UTF-8 are
/// replaced rather than ending the stream. The pipe is read to EOF even once
/// the receiver is gone, so the child never writes into a closed pipe.
pub(crate) fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut forwarding = true;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if !forwarding {
                        continue;
                    }
                    let line = OutputLine {
                        stream,
                        text: decode_line(&buf),
                    };
                    if tx.send(line).await.is_err() {
                        tracing::trace!(%stream, "Output receiver closed, discarding the rest");
                        forwarding = false;
                    }
                }
                Err(e) => {
                    tracing::debug!(%stream, error = %e, "Failed to read child output");
                    break;
                }
            }
        }

        tracing::trace!(%stream, "Output stream closed");
    });
}

/// Strip the line terminator and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        forward_lines(input, OutputStream::Stdout, tx);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line.text);
        }
        lines
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"done\n"), "done");
        assert_eq!(decode_line(b"done\r\n"), "done");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_end_the_stream() {
        let lines = collect(b"Compiling \xff\xfe\nListening on 127.0.0.1:8545\r\ntail").await;

        assert_eq!(
            lines,
            vec![
                "Compiling \u{fffd}\u{fffd}".to_string(),
                "Listening on 127.0.0.1:8545".to_string(),
                "tail".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reads_to_eof_after_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let (reader, mut writer) = tokio::io::duplex(64);
        forward_lines(reader, OutputStream::Stderr, tx);

        // Far more than the duplex buffer: only completes if the forwarder keeps reading.
        let chunk = vec![b'x'; 4096];
        for _ in 0..16 {
            tokio::io::AsyncWriteExt::write_all(&mut writer, &chunk).await.unwrap();
        }
    }
}
