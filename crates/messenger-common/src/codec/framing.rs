//! Wire framing: every message, handshake step or command alike, is a
//! 4-byte big-endian length prefix followed by that many payload bytes.
//! There is no magic number and no varint — just the length and the bytes.

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Result of a blocking frame read.
pub enum RecvOutcome {
    Frame(Vec<u8>),
    CloseConnection,
}

/// Result of a non-blocking frame probe.
pub enum PollOutcome {
    Frame(Vec<u8>),
    NoMessage,
    CloseConnection,
}

/// Write a length-prefixed frame. `payload.len()` must fit in a `u32`;
/// callers that build payloads via [`crate::codec::pack_command`] already
/// have that guarantee enforced.
pub async fn send_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame payload too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Read one frame, blocking until the length prefix and payload both
/// arrive. Used during the handshake stages, where the next frame is
/// always expected.
pub async fn recv_frame<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<RecvOutcome> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(RecvOutcome::CloseConnection)
        }
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(RecvOutcome::Frame(payload))
}

/// Probe for a frame without blocking if nothing has arrived yet. Once the
/// first byte of the length prefix has shown up, the rest of the prefix and
/// the payload are read with ordinary blocking reads (the sender is already
/// mid-frame, so waiting for the remainder is bounded). This is the
/// async-native equivalent of toggling a socket's blocking mode for a
/// single `recv` call.
pub async fn poll_frame(stream: &mut TcpStream) -> io::Result<PollOutcome> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0usize;

    loop {
        match stream.try_read(&mut len_buf[filled..]) {
            Ok(0) => return Ok(PollOutcome::CloseConnection),
            Ok(n) => {
                filled += n;
                if filled == 4 {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if filled == 0 {
                    return Ok(PollOutcome::NoMessage);
                }
                stream.readable().await?;
            }
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(PollOutcome::Frame(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_a_frame_over_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        send_frame(&mut client, b"hello").await.unwrap();
        match recv_frame(&mut server).await.unwrap() {
            RecvOutcome::Frame(data) => assert_eq!(data, b"hello"),
            RecvOutcome::CloseConnection => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn empty_payload_roundtrips() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        send_frame(&mut client, b"").await.unwrap();
        match recv_frame(&mut server).await.unwrap() {
            RecvOutcome::Frame(data) => assert!(data.is_empty()),
            RecvOutcome::CloseConnection => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn recv_reports_close_on_eof_before_any_bytes() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        match recv_frame(&mut server).await.unwrap() {
            RecvOutcome::CloseConnection => {}
            RecvOutcome::Frame(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn poll_frame_over_real_sockets_reports_no_message_then_a_frame() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            send_frame(&mut stream, b"ping").await.unwrap();
            stream
        });

        let (mut server_stream, _) = listener.accept().await.unwrap();

        match poll_frame(&mut server_stream).await.unwrap() {
            PollOutcome::NoMessage => {}
            _ => panic!("expected no message yet"),
        }

        loop {
            match poll_frame(&mut server_stream).await.unwrap() {
                PollOutcome::Frame(data) => {
                    assert_eq!(data, b"ping");
                    break;
                }
                PollOutcome::NoMessage => {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                PollOutcome::CloseConnection => panic!("unexpected close"),
            }
        }

        let _ = client_task.await.unwrap();
    }
}
