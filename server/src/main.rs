mod bridge_server;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bridge_server::{ServerTarget, SocketRegistry};
use serbridge::{Bridge, BridgeConfig, LoopbackTransport, SerialPortConfig, SerialPortTransport, Transport};

/// Bridge an HC-06 serial adapter to a local socket.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial device the adapter is attached to, e.g. /dev/ttyS1
    #[arg(long, required_unless_present = "loopback", conflicts_with = "loopback")]
    device: Option<String>,

    /// Use an in-memory loopback instead of a serial device
    #[arg(long)]
    loopback: bool,

    /// Endpoint name
    #[arg(long, default_value = serbridge::DEFAULT_ENDPOINT_NAME)]
    name: String,

    /// Listen on a Unix socket (default: /tmp/<class>-<name>.sock)
    #[arg(long, group = "target")]
    unix: Option<PathBuf>,

    /// Listen on a TCP address
    #[arg(long, group = "target")]
    tcp: Option<SocketAddr>,

    /// Listen on a vsock address, as CID:PORT
    #[arg(long, group = "target", value_parser = parse_vsock)]
    vsock: Option<(u32, u32)>,
}

impl Args {
    fn target(&self) -> ServerTarget {
        if let Some(addr) = self.tcp {
            ServerTarget::Tcp(addr)
        } else if let Some((cid, port)) = self.vsock {
            ServerTarget::Vsock { cid, port }
        } else {
            let path = self.unix.clone().unwrap_or_else(|| {
                PathBuf::from(format!("/tmp/{}-{}.sock", serbridge::ENDPOINT_CLASS, self.name))
            });
            ServerTarget::Unix(path)
        }
    }

    fn transport(&self) -> Result<Box<dyn Transport>> {
        match (&self.device, self.loopback) {
            (_, true) => Ok(Box::new(LoopbackTransport::new())),
            (Some(path), false) => Ok(Box::new(SerialPortTransport::new(SerialPortConfig::new(path)))),
            (None, false) => bail!("either --device or --loopback is required"),
        }
    }
}

fn parse_vsock(s: &str) -> std::result::Result<(u32, u32), String> {
    let (cid, port) = s.split_once(':').ok_or("expected CID:PORT")?;
    let cid = cid.parse().map_err(|e| format!("bad CID: {}", e))?;
    let port = port.parse().map_err(|e| format!("bad port: {}", e))?;
    Ok((cid, port))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let target = args.target();
    info!("Serving '{}' on {:?}", args.name, target);

    let registry = SocketRegistry::new(target, runtime.handle().clone());
    let bridge: Bridge<Box<dyn Transport>, SocketRegistry> =
        Bridge::with_config(registry, BridgeConfig::new().with_endpoint_name(&args.name));
    bridge.attach(args.transport()?).context("Failed to attach bridge")?;

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to wait for Ctrl-C")?;

    info!("Shutting down");
    bridge.detach();

    let stats = bridge.stats();
    info!("=== Bridge Stats ===");
    info!("Received: {} bytes ({} dropped)", stats.bytes_received, stats.bytes_dropped);
    info!("Sent: {} bytes in {} writes", stats.bytes_sent, stats.writes);
    info!("Reads: {}", stats.reads);

    drop(bridge);
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vsock() {
        assert_eq!(parse_vsock("3:1234"), Ok((3, 1234)));
        assert!(parse_vsock("3").is_err());
        assert!(parse_vsock("x:1").is_err());
    }

    #[test]
    fn test_default_target() {
        let args = Args::parse_from(["server", "--loopback"]);
        match args.target() {
            ServerTarget::Unix(path) => assert_eq!(path, PathBuf::from("/tmp/bluetooth-hc06_bt.sock")),
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_device_and_loopback_conflict() {
        assert!(Args::try_parse_from(["server", "--loopback", "--device", "/dev/ttyS1"]).is_err());
        assert!(Args::try_parse_from(["server"]).is_err());
        assert!(Args::try_parse_from(["server", "--tcp", "127.0.0.1:9000", "--unix", "/tmp/x"]).is_err());
    }
}
