use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::StreamDecoder;
use crate::error::Result;
use crate::value::Value;

/// Receiving end of the log server's push protocol.
///
/// ```no_run
/// use mpacklog::StreamClient;
///
/// # async fn run() -> mpacklog::Result<()> {
/// let mut client = StreamClient::connect("127.0.0.1:4747").await?;
/// while let Some(record) = client.next_record().await? {
///     println!("{:?}", record);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StreamClient {
    stream: TcpStream,
    decoder: StreamDecoder,
    chunk: Vec<u8>,
}

impl StreamClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            decoder: StreamDecoder::new(),
            chunk: vec![0; 4096],
        })
    }

    /// Waits for the next record pushed by the server.
    ///
    /// Returns `None` once the server closed the connection.
    pub async fn next_record(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(value) = self.decoder.next_value()? {
                return Ok(Some(value));
            }
            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.feed(&self.chunk[..n]);
        }
    }
}
