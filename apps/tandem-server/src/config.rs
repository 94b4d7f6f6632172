use anyhow::{bail, Context};
use clap::{Args, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tandem_core::{BrokerConfig, DisplacedPolicy, NotifyScope, DEFAULT_MAX_PAYLOAD_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NotifyArg {
    PeerOnly,
    AllSessions,
}

impl From<NotifyArg> for NotifyScope {
    fn from(arg: NotifyArg) -> Self {
        match arg {
            NotifyArg::PeerOnly => NotifyScope::PeerOnly,
            NotifyArg::AllSessions => NotifyScope::AllSessions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisplacedArg {
    Orphan,
    Close,
}

impl From<DisplacedArg> for DisplacedPolicy {
    fn from(arg: DisplacedArg) -> Self {
        match arg {
            DisplacedArg::Orphan => DisplacedPolicy::Orphan,
            DisplacedArg::Close => DisplacedPolicy::Close,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "TANDEM_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Overrides the port of the listen address (set by most hosting platforms).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Largest frame accepted from a client, in bytes.
    #[arg(long, env = "TANDEM_MAX_PAYLOAD_BYTES", default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: usize,

    /// Who is told when the controlled device connects or disconnects.
    #[arg(long, env = "TANDEM_NOTIFY_SCOPE", value_enum, default_value_t = NotifyArg::PeerOnly)]
    pub notify: NotifyArg,

    /// What to do with a session whose role is claimed by a newer registration.
    #[arg(long, env = "TANDEM_DISPLACED_POLICY", value_enum, default_value_t = DisplacedArg::Orphan)]
    pub displaced: DisplacedArg,

    /// Also send controller presence changes to the controlled device.
    #[arg(long, env = "TANDEM_SYMMETRIC_PEER_STATUS", default_value_t = false)]
    pub symmetric_peer_status: bool,

    /// Close connections that send nothing for this many seconds (0 disables).
    #[arg(long, env = "TANDEM_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Directory served for every path not handled by the API.
    #[arg(long, env = "TANDEM_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Grace period applied during shutdown.
    #[arg(long, env = "TANDEM_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info,tandem_server=debug,tandem_core=debug")]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub broker: BrokerConfig,
    pub idle_timeout: Option<Duration>,
    pub static_dir: PathBuf,
    pub shutdown_grace: Duration,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let mut listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        if let Some(port) = args.port {
            listen_addr.set_port(port);
        }
        if args.max_payload_bytes == 0 {
            bail!("max payload size must be greater than zero");
        }

        Ok(ServerConfig {
            listen_addr,
            broker: BrokerConfig {
                notify_scope: args.notify.into(),
                displaced: args.displaced.into(),
                symmetric_peer_status: args.symmetric_peer_status,
                max_payload_bytes: args.max_payload_bytes,
            },
            idle_timeout: (args.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(args.idle_timeout_secs)),
            static_dir: args.static_dir,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            broker: BrokerConfig::default(),
            idle_timeout: Some(Duration::from_secs(600)),
            static_dir: PathBuf::from("public"),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
