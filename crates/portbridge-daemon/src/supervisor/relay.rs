//! Line relay from the child's merged output to a sink.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Copy `reader` to `sink` one line at a time, flushing after every line.
///
/// Lines are forwarded as raw bytes including their terminator, so the sink
/// sees exactly what the child wrote. A final unterminated line is forwarded
/// as-is. Returns the number of lines relayed once `reader` hits end-of-stream.
pub async fn relay_lines<R, W>(reader: R, sink: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut relayed = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        sink.write_all(&line).await?;
        sink.flush().await?;
        relayed += 1;
    }

    Ok(relayed)
}
