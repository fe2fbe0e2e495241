use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

/// Size of each direction's internal buffer for the splice pipe. Generous
/// enough that a single TLS record or HTTP response chunk doesn't stall on
/// backpressure against the other half.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Splice a raw duplex socket into an in-memory pipe, re-injecting
/// `prefix` bytes consumed earlier by the sniffer so downstream readers
/// (the TLS acceptor, or the HTTP pump for plaintext sessions) see exactly
/// the same byte stream the client sent.
///
/// Returns the application-facing end of the pipe; the socket-facing end is
/// driven by two background copy tasks for the lifetime of the connection.
pub fn splice<S>(socket: S, prefix: Vec<u8>) -> DuplexStream
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (app_side, socket_side) = io::duplex(PIPE_CAPACITY);
    let (mut socket_side_read, mut socket_side_write) = io::split(socket_side);

    tokio::spawn(async move {
        if !prefix.is_empty() && socket_side_write.write_all(&prefix).await.is_err() {
            return;
        }

        let (mut sock_read, mut sock_write) = io::split(socket);

        let to_app = async {
            io::copy(&mut sock_read, &mut socket_side_write).await?;
            socket_side_write.shutdown().await
        };
        let from_app = async {
            io::copy(&mut socket_side_read, &mut sock_write).await?;
            sock_write.shutdown().await
        };

        let _ = tokio::join!(to_app, from_app);
    });

    app_side
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn prefix_is_delivered_before_subsequent_bytes() {
        let (mut test_socket, socket) = duplex(1024);
        let mut app_side = splice(socket, b"PRE".to_vec());

        test_socket.write_all(b"FIX").await.unwrap();

        let mut buf = [0u8; 6];
        app_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PREFIX");
    }

    #[tokio::test]
    async fn bytes_flow_back_to_the_socket() {
        let (mut test_socket, socket) = duplex(1024);
        let mut app_side = splice(socket, Vec::new());

        app_side.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        test_socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
