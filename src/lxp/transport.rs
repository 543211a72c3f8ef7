use crate::prelude::*;

use {
    async_trait::async_trait,
    bytes::BytesMut,
    net2::TcpStreamExt,
    std::time::Duration,
    tokio::io::AsyncWriteExt,
    tokio::net::TcpStream,
};

/// Upper bound on unread bytes held for the session.
pub const MAX_BUFFER_SIZE: usize = 65536;

const WRITE_TIMEOUT_SECS: u64 = 5;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// Byte stream to the datalog as seen by the poll session.
///
/// Reads never block: the session drains whatever `bytes_available` reports on each tick.
#[async_trait]
pub trait Transport: Send {
    /// Returns whether the connection came up.
    async fn connect(&mut self, host: &str, port: u16) -> bool;

    fn connected(&self) -> bool;

    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    fn bytes_available(&mut self) -> usize;

    fn read(&mut self, max: usize) -> Vec<u8>;

    fn disconnect(&mut self);
}

// {{{ TcpTransport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pending: BytesMut,
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, nodelay: bool) -> Self {
        Self {
            stream: None,
            pending: BytesMut::with_capacity(MAX_BUFFER_SIZE),
            connect_timeout,
            nodelay,
        }
    }

    fn configure(&self, stream: TcpStream) -> Result<TcpStream> {
        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("failed to set TCP keepalive: {}", e);
        }

        let stream = TcpStream::from_std(std_stream)?;
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("failed to set TCP_NODELAY: {}", e);
            }
        }

        Ok(stream)
    }

    // moves everything the socket has ready into `pending` without waiting
    fn fill(&mut self) {
        let mut closed = false;

        if let Some(stream) = &self.stream {
            let mut chunk = [0u8; 1024];
            while self.pending.len() < MAX_BUFFER_SIZE {
                match stream.try_read(&mut chunk) {
                    Ok(0) => {
                        info!("connection closed by peer");
                        closed = true;
                        break;
                    }
                    Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("read error: {}", e);
                        closed = true;
                        break;
                    }
                }
            }
        }

        if closed {
            self.stream = None;
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> bool {
        self.disconnect();

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("{}: {}", LxpError::ConnectionFailed(format!("{}:{}", host, port)), e);
                return false;
            }
            Err(_) => {
                warn!(
                    "{}: timeout after {}ms",
                    LxpError::ConnectionFailed(format!("{}:{}", host, port)),
                    self.connect_timeout.as_millis()
                );
                return false;
            }
        };

        match self.configure(stream) {
            Ok(stream) => {
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                warn!("failed to configure socket for {}:{}: {}", host, port, e);
                false
            }
        }
    }

    fn connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("send on a closed connection"))?;

        let result = tokio::time::timeout(
            Duration::from_secs(WRITE_TIMEOUT_SECS),
            async {
                stream.write_all(bytes).await?;
                stream.flush().await
            },
        )
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stream = None;
                bail!("write failed: {}", e)
            }
            Err(_) => {
                self.stream = None;
                bail!("write timeout after {} seconds", WRITE_TIMEOUT_SECS)
            }
        }
    }

    fn bytes_available(&mut self) -> usize {
        self.fill();
        self.pending.len()
    }

    fn read(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.pending.len());
        self.pending.split_to(n).to_vec()
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.pending.clear();
    }
} // }}}
