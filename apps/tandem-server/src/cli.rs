use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tandem_core::Envelope;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::config::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "tandem-server", version)]
#[command(about = "Pairs a controller with a controlled device and relays events between them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay, register a role and print what arrives
    Probe(ProbeArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProbeRole {
    Controlled,
    Controller,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Websocket endpoint of the relay
    #[arg(short, long, default_value = "ws://localhost:3000/ws")]
    pub url: String,

    /// Role to register as
    #[arg(short, long, value_enum, default_value_t = ProbeRole::Controller)]
    pub role: ProbeRole,

    /// Device label sent with the registration
    #[arg(short, long)]
    pub label: Option<String>,

    /// Command to send once registered (controller only)
    #[arg(short, long)]
    pub command: Option<String>,

    /// Stop after this many events (runs until the relay closes otherwise)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

impl ProbeArgs {
    /// Rejects flag combinations the relay would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_some() && matches!(self.role, ProbeRole::Controlled) {
            return Err(anyhow!("only a controller can send commands"));
        }
        Ok(())
    }
}

pub async fn run_probe(args: ProbeArgs) -> Result<()> {
    args.validate()?;
    debug!("Connecting to {}", args.url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&args.url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", args.url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!("Connection timeout - is the relay running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let register = match args.role {
        ProbeRole::Controlled => "register-controlled",
        ProbeRole::Controller => "register-controller",
    };
    let registration = Envelope::new(register, json!({ "label": args.label }));
    write.send(Message::Text(registration.to_json().into())).await?;

    if let Some(cmd) = &args.command {
        let command = Envelope::new("command", json!({ "cmd": cmd }));
        write.send(Message::Text(command.to_json().into())).await?;
    }

    let mut seen = 0usize;
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let envelope: Envelope = serde_json::from_str(text.as_str())?;
                println!("{}", serde_json::to_string(&envelope)?);
                seen += 1;
                if args.count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
            Message::Close(frame) => {
                debug!("Relay closed the connection: {:?}", frame);
                break;
            }
            _ => {}
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
