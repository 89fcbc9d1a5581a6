use futures::io::{AsyncRead, AsyncWrite};
use futures::{AsyncReadExt, AsyncWriteExt};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpStream, UnixStream};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tokio_vsock::{VsockAddr, VsockStream};
use log::*;

#[derive(Debug, Clone)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

/// What to do once connected.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send the bytes and disconnect.
    Send(Vec<u8>),
    /// Wait for one chunk of at most `max` bytes and return it.
    Recv { max: usize },
    /// Copy stdin to the endpoint and the endpoint to stdout.
    Pipe,
}

pub struct EndpointClient {
    target: ClientTarget,
}

impl EndpointClient {
    pub fn new(target: ClientTarget) -> Self {
        Self { target }
    }

    /// Connects and runs `action`. Returns received bytes for `Recv`.
    pub async fn run(&self, action: Action) -> io::Result<Vec<u8>> {
        info!("Connecting to target: {:?}", self.target);
        match &self.target {
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                info!("Unix socket connected.");
                process_stream(stream.compat(), action).await
            }
            ClientTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                info!("TCP socket connected.");
                process_stream(stream.compat(), action).await
            }
            ClientTarget::Vsock { cid, port } => {
                let stream = VsockStream::connect(VsockAddr::new(*cid, *port)).await?;
                info!("Vsock socket connected.");
                process_stream(stream.compat(), action).await
            }
        }
    }
}

async fn process_stream<T>(mut stream: T, action: Action) -> io::Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match action {
        Action::Send(data) => {
            stream.write_all(&data).await?;
            stream.flush().await?;
            stream.close().await?;
            info!("Sent {} bytes", data.len());
            Ok(Vec::new())
        }
        Action::Recv { max } => {
            let mut buf = vec![0u8; max];
            let n = stream.read(&mut buf).await?;
            buf.truncate(n);
            info!("Received {} bytes", n);
            Ok(buf)
        }
        Action::Pipe => {
            let stdin = tokio::io::stdin().compat();
            let stdout = tokio::io::stdout().compat_write();
            pipe(stream, stdin, stdout).await?;
            Ok(Vec::new())
        }
    }
}

/// Copies `input` to the endpoint and the endpoint to `output`.
///
/// End of `input` half-closes the connection; the session lasts until the
/// endpoint side closes.
async fn pipe<S, I, O>(stream: S, input: I, mut output: O) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (reader, mut writer) = stream.split();

    let uplink = async {
        let n = futures::io::copy(input, &mut writer).await?;
        writer.close().await?;
        info!("Input closed after {} bytes", n);
        futures::future::pending::<io::Result<()>>().await
    };

    tokio::select! {
        res = uplink => res?,
        res = futures::io::copy(reader, &mut output) => {
            let n = res?;
            info!("Endpoint closed after {} bytes", n);
        }
    }
    Ok(())
}
