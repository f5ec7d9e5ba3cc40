//! Newline-framed JSON channel over a Unix or TCP socket.
//!
//! Protocol: one connection per call. The request is serialized as a
//! single-line JSON document terminated by `\n`; the response is read
//! until a `\n` byte is observed and parsed as JSON. The JSON is
//! assumed single-line and to fit before the delimiter.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use warden_core::{ChannelError, Endpoint, GenerationRequest, GenerationResponse};
use warden_core::ports::GenerationChannel;

/// Either of the two socket stream types behind one object.
trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// One-connection-per-request JSON channel.
pub struct FramedSocketChannel {
    endpoint: Endpoint,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl FramedSocketChannel {
    pub const fn new(
        endpoint: Endpoint,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            connect_timeout,
            request_timeout,
        }
    }

    async fn connect(&self) -> Result<Box<dyn IoStream>, ChannelError> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = timeout(
                    self.connect_timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| ChannelError::failure(format!("connect timeout to {host}:{port}")))?
                .map_err(ChannelError::failure)?;
                Ok(Box::new(stream))
            }
            Endpoint::Unix(path) => {
                #[cfg(unix)]
                {
                    let stream =
                        timeout(self.connect_timeout, tokio::net::UnixStream::connect(path))
                            .await
                            .map_err(|_| {
                                ChannelError::failure(format!(
                                    "connect timeout to {}",
                                    path.display()
                                ))
                            })?
                            .map_err(ChannelError::failure)?;
                    Ok(Box::new(stream))
                }
                #[cfg(not(unix))]
                {
                    Err(ChannelError::failure(format!(
                        "unix sockets unsupported on this platform: {}",
                        path.display()
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl GenerationChannel for FramedSocketChannel {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ChannelError> {
        let mut payload = serde_json::to_vec(request).map_err(ChannelError::failure)?;
        payload.push(b'\n');

        let stream = self.connect().await?;
        let mut stream = BufReader::new(stream);

        stream
            .get_mut()
            .write_all(&payload)
            .await
            .map_err(ChannelError::failure)?;
        stream.get_mut().flush().await.map_err(ChannelError::failure)?;

        // The read deadline is the per-request timeout, independent of
        // the connect timeout above
        let mut buf = Vec::with_capacity(4096);
        let read = timeout(self.request_timeout, stream.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(ChannelError::failure)?;

        if read == 0 {
            return Err(ChannelError::failure("connection closed before response"));
        }

        debug!(bytes = %buf.len(), endpoint = %self.endpoint, "Received framed response");

        let response: GenerationResponse =
            serde_json::from_slice(&buf).map_err(ChannelError::failure)?;
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use warden_core::SamplingParams;

    fn channel_for(port: u16) -> FramedSocketChannel {
        FramedSocketChannel::new(
            Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    async fn mock_server(listener: TcpListener, reply: &'static [u8]) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 4096];
        let n = socket.read(&mut received).await.unwrap();
        socket.write_all(reply).await.unwrap();
        String::from_utf8_lossy(&received[..n]).to_string()
    }

    #[tokio::test]
    async fn round_trip_extracts_text_field() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(mock_server(listener, b"{\"text\":\"4\"}\n"));

        let request = GenerationRequest::new("2+2?", SamplingParams::default());
        let text = channel_for(port).submit(&request).await.unwrap();
        assert_eq!(text, "4");

        let wire = server.await.unwrap();
        assert_eq!(wire, "{\"prompt\":\"2+2?\",\"params\":{}}\n");
    }

    #[tokio::test]
    async fn connect_failure_is_channel_failure() {
        let request = GenerationRequest::new("hi", SamplingParams::default());
        let err = channel_for(1).submit(&request).await.unwrap_err();
        assert!(matches!(err, ChannelError::Failure(_)));
    }

    #[tokio::test]
    async fn malformed_reply_is_channel_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(mock_server(listener, b"not json at all\n"));

        let request = GenerationRequest::new("hi", SamplingParams::default());
        let err = channel_for(port).submit(&request).await.unwrap_err();
        assert!(matches!(err, ChannelError::Failure(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept but never reply; hold the socket open past the deadline
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let channel = FramedSocketChannel::new(
            Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            Duration::from_secs(1),
            Duration::from_millis(100),
        );
        let request = GenerationRequest::new("hi", SamplingParams::default());
        let err = channel.submit(&request).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn round_trip_over_unix_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; 4096];
            let _ = socket.read(&mut received).await.unwrap();
            socket.write_all(b"{\"text\":\"pong\"}\n").await.unwrap();
        });

        let channel = FramedSocketChannel::new(
            Endpoint::Unix(path),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let request = GenerationRequest::new("ping", SamplingParams::default());
        assert_eq!(channel.submit(&request).await.unwrap(), "pong");
    }
}
