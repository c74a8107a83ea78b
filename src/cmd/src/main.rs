use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use common::config::Config;
use common::sys_utils::PidFile;
use common::ShutdownMessage;
use dumper::log::{EventLog, EventSink, LogFormat};
use dumper::{new_dumper, DumperKind};
use server::read::read_pcap;
use server::{ProbeOptions, ProbeServer, ProxyServer};

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "tcpscope",
    version = "0.1.0",
    about = "TCP dump tool with custom dumpers for database protocols."
)]
struct TcpscopeArgs {
    #[clap(long, short = 'c', value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,
    #[clap(long, value_name = "LOG_LEVEL", global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    #[command(about = "Run a transparent TCP proxy and dump matching traffic")]
    Proxy {
        #[clap(long, short = 'l', value_name = "LISTEN_ADDR")]
        listen_addr: Option<String>,
        #[clap(long, short = 'r', value_name = "REMOTE_ADDR")]
        remote_addr: Option<String>,
        #[clap(long, short = 'd', value_name = "DUMPER")]
        dumper: Option<String>,
        #[clap(long)]
        use_server_starter: bool,
        #[clap(long)]
        proxy_protocol: bool,
        #[clap(long, value_name = "PIDFILE")]
        pidfile: Option<String>,
    },
    #[command(about = "Observe an interface passively and dump matching traffic")]
    Probe {
        #[clap(long, short = 'i', value_name = "INTERFACE")]
        interface: Option<String>,
        #[clap(long, short = 't', value_name = "TARGET")]
        target: Option<String>,
        #[clap(long, short = 'd', value_name = "DUMPER")]
        dumper: Option<String>,
        #[clap(long, short = 'B', value_name = "BUFFER_SIZE")]
        buffer_size: Option<usize>,
        #[clap(long)]
        immediate_mode: bool,
        #[clap(long, short = 's', value_name = "SNAPSHOT_LENGTH")]
        snapshot_length: Option<usize>,
        #[clap(long, value_name = "INTERNAL_BUFFER_LENGTH")]
        internal_buffer_length: Option<usize>,
        #[clap(long, value_name = "FILTER")]
        filter: Option<String>,
        #[clap(long)]
        proxy_protocol: bool,
        #[clap(long, value_name = "PIDFILE")]
        pidfile: Option<String>,
    },
    #[command(about = "Read a pcap savefile and dump matching traffic")]
    Read {
        #[clap(value_name = "PCAP")]
        pcap: PathBuf,
        #[clap(long, short = 't', value_name = "TARGET")]
        target: Option<String>,
        #[clap(long, short = 'd', value_name = "DUMPER")]
        dumper: Option<String>,
        #[clap(long, short = 'f', value_name = "FORMAT")]
        format: Option<String>,
    },
    #[command(about = "Show the resolved configuration")]
    Config,
}

fn resolve_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("can not resolve addr: {addr}"))
}

fn resolve_dumper(name: &str) -> anyhow::Result<DumperKind> {
    DumperKind::parse(name).ok_or_else(|| anyhow::anyhow!("unknown dumper: {name}"))
}

fn resolve_format(name: &str) -> anyhow::Result<LogFormat> {
    LogFormat::parse(name).ok_or_else(|| anyhow::anyhow!("unknown dump format: {name}"))
}

fn new_event_log(config: &Config, format: LogFormat) -> anyhow::Result<Arc<dyn EventSink>> {
    let mut event_log = EventLog::new(format, config.dump_log.stdout);
    if config.dump_log.enable && !config.dump_log.dir.is_empty() {
        let path = PathBuf::from(&config.dump_log.dir).join("dump.log");
        event_log = event_log.with_file(path)?;
    }
    Ok(Arc::new(event_log))
}

async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install signal handler");
    let mut quit = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
        .expect("failed to install signal handler");

    tokio::select! {
        _ = ctrl_c => ShutdownMessage::Immediate("SIGINT".to_string()),
        _ = terminate.recv() => ShutdownMessage::Graceful("SIGTERM".to_string()),
        _ = quit.recv() => ShutdownMessage::Graceful("SIGQUIT".to_string()),
    }
}

fn main() -> anyhow::Result<()> {
    let args = TcpscopeArgs::parse();
    let (config, config_path) = Config::load(args.config.as_deref())?;

    if let Command::Config = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.clone());
    common::logging::init_tracing(Some(&log_level))?;
    if let Some(path) = &config_path {
        info!("using config file. path={}", path.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("TCPSCOPE")
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
    runtime.spawn(async move {
        let message = shutdown_signal().await;
        info!("received shutdown signal. {message:?}");
        let _ = shutdown_tx.send(message);
    });

    runtime.block_on(run(args.command, config, shutdown_rx))
}

async fn run(
    command: Command,
    config: Config,
    shutdown_rx: watch::Receiver<ShutdownMessage>,
) -> anyhow::Result<()> {
    match command {
        Command::Proxy {
            listen_addr,
            remote_addr,
            dumper,
            use_server_starter,
            proxy_protocol,
            pidfile,
        } => {
            let listen_addr =
                resolve_addr(&listen_addr.unwrap_or_else(|| config.proxy.listen_addr.clone()))?;
            let remote_addr =
                resolve_addr(&remote_addr.unwrap_or_else(|| config.proxy.remote_addr.clone()))?;
            let kind =
                resolve_dumper(&dumper.unwrap_or_else(|| config.tcpscope.dumper.clone()))?;
            let sink = new_event_log(&config, resolve_format(&config.dump_log.format)?)?;

            let pidfile_path = pidfile.unwrap_or_else(|| config.tcpscope.pidfile.clone());
            let _pidfile = if pidfile_path.is_empty() {
                None
            } else {
                Some(PidFile::write(&pidfile_path)?)
            };

            let proxy = ProxyServer::new(
                listen_addr,
                remote_addr,
                proxy_protocol || config.proxy.proxy_protocol,
                use_server_starter || config.proxy.use_server_starter,
                new_dumper(kind),
                sink,
            );
            proxy.serve(shutdown_rx).await
        }
        Command::Probe {
            interface,
            target,
            dumper,
            buffer_size,
            immediate_mode,
            snapshot_length,
            internal_buffer_length,
            filter,
            proxy_protocol,
            pidfile,
        } => {
            let kind =
                resolve_dumper(&dumper.unwrap_or_else(|| config.tcpscope.dumper.clone()))?;
            let sink = new_event_log(&config, resolve_format(&config.dump_log.format)?)?;

            let pidfile_path = pidfile.unwrap_or_else(|| config.tcpscope.pidfile.clone());
            let _pidfile = if pidfile_path.is_empty() {
                None
            } else {
                Some(PidFile::write(&pidfile_path)?)
            };

            let probe = ProbeServer::new(
                interface.unwrap_or_else(|| config.probe.interface.clone()),
                target.unwrap_or_else(|| config.probe.target.clone()),
                ProbeOptions {
                    snapshot_length: snapshot_length.unwrap_or(config.probe.snapshot_length),
                    buffer_size: buffer_size.unwrap_or(config.probe.buffer_size),
                    immediate_mode: immediate_mode || config.probe.immediate_mode,
                    internal_buffer_length: internal_buffer_length
                        .unwrap_or(config.probe.internal_buffer_length),
                    filter: filter.unwrap_or_else(|| config.probe.filter.clone()),
                    proxy_protocol: proxy_protocol || config.probe.proxy_protocol,
                    enable_internal_log: config.log.internal,
                },
                new_dumper(kind),
                sink,
            );
            probe.start(shutdown_rx).await
        }
        Command::Read {
            pcap,
            target,
            dumper,
            format,
        } => {
            let kind =
                resolve_dumper(&dumper.unwrap_or_else(|| config.tcpscope.dumper.clone()))?;
            let format = resolve_format(&format.unwrap_or_else(|| config.dump_log.format.clone()))?;
            // offline mode always prints to stdout
            let sink: Arc<dyn EventSink> = Arc::new(EventLog::new(format, true));
            read_pcap(
                &pcap,
                &target.unwrap_or_default(),
                new_dumper(kind),
                sink,
                false,
                shutdown_rx,
            )
            .await
        }
        Command::Config => unreachable!("handled before the runtime starts"),
    }
}
