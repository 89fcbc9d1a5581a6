mod endpoint_client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use endpoint_client::{Action, ClientTarget, EndpointClient};

const DEFAULT_SOCKET_PATH: &str = "/tmp/bluetooth-hc06_bt.sock";

/// Talk to a bridged HC-06 endpoint.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Connect over a Unix socket
    #[arg(long, group = "target")]
    unix: Option<PathBuf>,

    /// Connect over TCP
    #[arg(long, group = "target")]
    tcp: Option<SocketAddr>,

    /// Connect over vsock, as CID:PORT
    #[arg(long, group = "target", value_parser = parse_vsock)]
    vsock: Option<(u32, u32)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message to the peripheral
    Send {
        /// Text to send, or hex digits with --hex
        message: String,

        /// Treat MESSAGE as hex
        #[arg(long)]
        hex: bool,

        /// Append CR LF
        #[arg(long)]
        crlf: bool,
    },
    /// Wait for one chunk from the peripheral and print it
    Recv {
        /// Maximum bytes to take
        #[arg(long, default_value_t = 256)]
        max: usize,

        /// Print as hex
        #[arg(long)]
        hex: bool,
    },
    /// Copy stdin to the peripheral and the peripheral to stdout
    Pipe,
}

impl Args {
    fn target(&self) -> ClientTarget {
        if let Some(addr) = self.tcp {
            ClientTarget::Tcp(addr)
        } else if let Some((cid, port)) = self.vsock {
            ClientTarget::Vsock { cid, port }
        } else {
            ClientTarget::Unix(self.unix.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)))
        }
    }
}

fn parse_vsock(s: &str) -> std::result::Result<(u32, u32), String> {
    let (cid, port) = s.split_once(':').ok_or("expected CID:PORT")?;
    let cid = cid.parse().map_err(|e| format!("bad CID: {}", e))?;
    let port = port.parse().map_err(|e| format!("bad port: {}", e))?;
    Ok((cid, port))
}

fn encode_message(message: &str, hex: bool, crlf: bool) -> Result<Vec<u8>> {
    let mut data = if hex {
        hex::decode(message.replace(' ', "")).context("Invalid hex message")?
    } else {
        message.as_bytes().to_vec()
    };
    if crlf {
        data.extend_from_slice(b"\r\n");
    }
    Ok(data)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let client = EndpointClient::new(args.target());

    match &args.command {
        Command::Send { message, hex, crlf } => {
            let data = encode_message(message, *hex, *crlf)?;
            let start = Instant::now();
            client
                .run(Action::Send(data))
                .await
                .context("Failed to send message")?;
            info!("Send took {:.2} ms", start.elapsed().as_secs_f64() * 1000.0);
        }
        Command::Recv { max, hex } => {
            let data = client
                .run(Action::Recv { max: *max })
                .await
                .context("Failed to receive")?;
            let mut stdout = std::io::stdout();
            if *hex {
                writeln!(stdout, "{}", hex::encode(&data))?;
            } else {
                stdout.write_all(&data)?;
                stdout.flush()?;
            }
        }
        Command::Pipe => {
            client.run(Action::Pipe).await.context("Pipe failed")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_message() {
        assert_eq!(encode_message("AT", false, false).unwrap(), b"AT");
        assert_eq!(encode_message("AT", false, true).unwrap(), b"AT\r\n");
        assert_eq!(encode_message("41 54", true, false).unwrap(), b"AT");
        assert!(encode_message("4", true, false).is_err());
    }

    #[test]
    fn test_target_selection() {
        let args = Args::parse_from(["client", "recv"]);
        assert!(matches!(args.target(), ClientTarget::Unix(p) if p == PathBuf::from(DEFAULT_SOCKET_PATH)));

        let args = Args::parse_from(["client", "--vsock", "3:1234", "pipe"]);
        assert!(matches!(args.target(), ClientTarget::Vsock { cid: 3, port: 1234 }));
    }
}
