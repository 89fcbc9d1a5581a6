use futures::io::{AsyncRead, AsyncWrite};
use futures::{AsyncReadExt, AsyncWriteExt};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockListener};
use log::*;

use serbridge::{ByteStream, EndpointRegistry, Error};

/// Largest chunk pulled from the bridge per read.
const DOWNLINK_CHUNK: usize = serbridge::DEFAULT_RX_CAPACITY;

/// Largest chunk read from the socket before forwarding.
const UPLINK_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
    Vsock(VsockListener),
}

impl Listener {
    /// Binds synchronously; must run inside the runtime context.
    fn bind(target: &ServerTarget) -> io::Result<Self> {
        match target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = std::os::unix::net::UnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Ok(Listener::Unix(UnixListener::from_std(listener)?))
            }
            ServerTarget::Tcp(addr) => {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Ok(Listener::Tcp(TcpListener::from_std(listener)?))
            }
            ServerTarget::Vsock { cid, port } => {
                Ok(Listener::Vsock(VsockListener::bind(VsockAddr::new(*cid, *port))?))
            }
        }
    }
}

/// Exposes bridge endpoints on a socket.
pub struct SocketRegistry {
    target: ServerTarget,
    runtime: Handle,
}

impl SocketRegistry {
    pub fn new(target: ServerTarget, runtime: Handle) -> Self {
        Self { target, runtime }
    }
}

impl EndpointRegistry for SocketRegistry {
    type Endpoint = SocketEndpoint;

    fn create(&mut self, name: &str, stream: Arc<dyn ByteStream>) -> serbridge::Result<SocketEndpoint> {
        let _guard = self.runtime.enter();
        let listener = Listener::bind(&self.target)
            .map_err(|e| Error::Endpoint(format!("{} on {:?}: {}", name, self.target, e)))?;
        info!("Endpoint '{}' listening on {:?}", name, self.target);

        let task = self.runtime.spawn(serve(listener, stream));
        let unix_path = match &self.target {
            ServerTarget::Unix(path) => Some(path.clone()),
            _ => None,
        };

        Ok(SocketEndpoint {
            name: name.to_string(),
            task,
            unix_path,
        })
    }
}

/// A live socket endpoint. Dropping it stops accepting and closes the client.
pub struct SocketEndpoint {
    name: String,
    task: JoinHandle<()>,
    unix_path: Option<PathBuf>,
}

impl Drop for SocketEndpoint {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(path) = &self.unix_path {
            let _ = std::fs::remove_file(path);
        }
        info!("Endpoint '{}' closed", self.name);
    }
}

/// Accept loop. Clients are served one at a time.
async fn serve(listener: Listener, port: Arc<dyn ByteStream>) {
    loop {
        let res = match &listener {
            Listener::Unix(l) => match l.accept().await {
                Ok((stream, _)) => {
                    info!("Accepted Unix connection");
                    handle_connection(stream.compat(), Arc::clone(&port)).await
                }
                Err(e) => Err(e),
            },
            Listener::Tcp(l) => match l.accept().await {
                Ok((stream, peer)) => {
                    info!("Accepted TCP connection from {:?}", peer);
                    handle_connection(stream.compat(), Arc::clone(&port)).await
                }
                Err(e) => Err(e),
            },
            Listener::Vsock(l) => match l.accept().await {
                Ok((stream, addr)) => {
                    info!("Accepted Vsock connection from {:?}", addr);
                    handle_connection(stream.compat(), Arc::clone(&port)).await
                }
                Err(e) => Err(e),
            },
        };

        match res {
            Ok(()) => info!("Client disconnected"),
            Err(e) => {
                error!("Connection error: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Shuttles bytes between one client and the bridge until the client leaves.
///
/// Uplink: socket -> bridge write, resubmitting whatever the transport did not
/// accept. Downlink: blocking bridge reads on the blocking pool -> socket.
pub async fn handle_connection<T>(stream: T, port: Arc<dyn ByteStream>) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = stream.split();
    let stop = Arc::new(AtomicBool::new(false));

    let downlink = {
        let port = Arc::clone(&port);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            while !stop.load(Ordering::Acquire) {
                let p = Arc::clone(&port);
                let data = match tokio::task::spawn_blocking(move || p.read(DOWNLINK_CHUNK)).await {
                    Ok(Ok(data)) => data,
                    Ok(Err(e)) if e.is_retryable() => continue,
                    Ok(Err(e)) => {
                        warn!("Bridge read failed: {}", e);
                        break;
                    }
                    Err(e) => {
                        error!("Downlink task failed: {}", e);
                        break;
                    }
                };

                trace!("Downlink: {} bytes", data.len());
                if writer.write_all(&data).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        })
    };

    let mut buf = vec![0u8; UPLINK_CHUNK];
    let uplink: io::Result<()> = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            trace!("Uplink: {} bytes", n);
            forward(&port, buf[..n].to_vec()).await?;
        }
    }
    .await;

    // Release the downlink from a blocked read
    stop.store(true, Ordering::Release);
    port.interrupt();
    if let Err(e) = downlink.await {
        error!("Downlink task failed: {}", e);
    }

    uplink
}

/// Writes all of `pending` to the bridge, resubmitting unaccepted tails.
async fn forward(port: &Arc<dyn ByteStream>, mut pending: Vec<u8>) -> io::Result<()> {
    while !pending.is_empty() {
        let p = Arc::clone(port);
        let (rest, res) = tokio::task::spawn_blocking(move || {
            let res = p.write(&pending);
            (pending, res)
        })
        .await
        .map_err(io::Error::other)?;
        pending = rest;

        let accepted = res?;
        if accepted == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "bridge accepted no bytes"));
        }
        pending.drain(..accepted);
    }
    Ok(())
}
