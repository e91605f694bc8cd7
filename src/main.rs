use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use dnstweak::attribution::ProcessAttributor;
use dnstweak::proxy::{self, ProxyConfig, parse_listen_addr};
use dnstweak::resolv_conf::{DEFAULT_RESOLV_CONF, ResolvConf};
use dnstweak::upstream::Upstream;
use dnstweak::{OverrideTable, Result};

#[derive(Parser)]
#[command(name = "dnstweak")]
#[command(about = "Answer chosen hostnames locally and forward everything else", long_about = None)]
#[command(after_help = "Each SPEC is a hostname, followed by an \"=\" sign, followed by a \
comma-separated list of 1 or more IPv4 addresses, e.g. foo.example.com=1.2.3.4,5.6.7.8")]
struct Args {
    /// Listen address (IP:PORT or just PORT); probes 127.0.0.x:53 when omitted
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream DNS server (IP:PORT or just IP); read from the resolver file when omitted
    #[arg(short, long)]
    upstream: Option<String>,

    /// Point the system resolver file at this server while it runs
    #[arg(long)]
    resolv_conf: bool,

    /// Resolver file to splice
    #[arg(long, default_value = DEFAULT_RESOLV_CONF)]
    resolv_conf_path: PathBuf,

    /// Undo a splice left behind by an earlier run, then exit
    #[arg(long)]
    restore_resolv_conf: bool,

    /// Log which local process sent each query (reads /proc)
    #[arg(long)]
    proc: bool,

    /// More logging (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Overrides, as HOST=IP[,IP...]
    specs: Vec<String>,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn,dnstweak=info",
            1 => "warn,dnstweak=debug",
            _ => "warn,dnstweak=trace",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 0)
        .init();
}

fn run(args: Args) -> Result<()> {
    if args.restore_resolv_conf {
        let file = ResolvConf::with_path(&args.resolv_conf_path);
        if !file.recover()? {
            tracing::info!(path = %file.path().display(), "resolver file is not spliced, nothing to do");
        }
        return Ok(());
    }

    // Parse everything before any socket is opened.
    let config = ProxyConfig {
        overrides: OverrideTable::from_specs(&args.specs)?,
        listen: args.listen.as_deref().map(parse_listen_addr).transpose()?,
        upstream: args.upstream.as_deref().map(str::parse::<Upstream>).transpose()?,
        resolv_conf: args
            .resolv_conf
            .then(|| ResolvConf::with_path(&args.resolv_conf_path)),
        attributor: args.proc.then(ProcessAttributor::new),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(config))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
