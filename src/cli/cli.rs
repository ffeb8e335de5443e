use clap::{ArgGroup, Args, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cores::engine::config::DEFAULT_REPORT_PATH;
use crate::cores::engine::{RunConfig, ScanProfile};
use crate::cores::events::{DEFAULT_BACKLOG, EventBus, feed};
use crate::cores::host::{ProbeMethod, TargetSource};
use crate::cores::report::ReportFormat;
use crate::cores::tooling::{ProcessInvoker, ToolCatalog, ToolTemplates};
use crate::errors::UltrascanError;
use crate::modules::{RunSummary, ScanRun};

// logging
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ultrascan", about = "ultrascan CLI", version)]
pub struct Cli {
    /// global log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scan pipeline against one or more targets
    Scan(ScanArgs),
    /// Show which external tools are available
    Tools {
        /// YAML file overriding tool programs/arguments
        #[arg(long)]
        tools: Option<PathBuf>,
        /// print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["target", "input", "url"])))]
pub struct ScanArgs {
    /// target host/URL, or a target file when such a file exists
    #[arg(short = 't', long)]
    pub target: Option<String>,
    /// file with one target per line
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,
    /// single URL or host
    #[arg(short = 'u', long)]
    pub url: Option<String>,
    /// consolidated report path
    #[arg(long, default_value = DEFAULT_REPORT_PATH)]
    pub out: PathBuf,
    /// report format: text/json
    #[arg(long, default_value = "text")]
    pub format: String,
    /// scan depth: light/normal/deep
    #[arg(long, default_value = "normal")]
    pub profile: String,
    /// max concurrent targets (default: profile preset)
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// per-tool timeout in seconds (default: profile preset)
    #[arg(long)]
    pub timeout: Option<u64>,
    /// liveness probe timeout in seconds
    #[arg(long, default_value_t = 3)]
    pub probe_timeout: u64,
    /// skip liveness gating and scan every target
    #[arg(long)]
    pub no_ping: bool,
    /// liveness probe: auto/icmp/http
    #[arg(long, default_value = "auto")]
    pub probe: String,
    /// slow, fragmented port scan
    #[arg(long)]
    pub stealth: bool,
    /// YAML file overriding tool programs/arguments
    #[arg(long)]
    pub tools: Option<PathBuf>,
    /// directory for raw side artifacts
    #[arg(long)]
    pub artifacts: Option<PathBuf>,
    /// also write every event as a JSON line to this file
    #[arg(long)]
    pub events_out: Option<PathBuf>,
    /// cap on simultaneously running tool processes
    #[arg(long)]
    pub max_procs: Option<usize>,
    /// serve the live event feed over HTTP (SSE at /stream)
    #[arg(long)]
    pub serve: bool,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
    /// do not print events to the console
    #[arg(long)]
    pub quiet: bool,
}

pub fn build_run_config(args: &ScanArgs) -> Result<RunConfig, UltrascanError> {
    let source = match (&args.target, &args.input, &args.url) {
        (Some(t), _, _) => TargetSource::Auto(t.clone()),
        (_, Some(p), _) => TargetSource::File(p.clone()),
        (_, _, Some(u)) => TargetSource::Literal(u.clone()),
        _ => {
            return Err(UltrascanError::MissingArgument {
                arg: "--target | --input | --url".to_string(),
            });
        }
    };
    let profile = ScanProfile::parse(&args.profile).ok_or_else(|| {
        UltrascanError::Config(format!(
            "unknown profile '{}' (expected light, normal or deep)",
            args.profile
        ))
    })?;

    let mut config = RunConfig::for_profile(profile, source);
    if args.stealth {
        config = config.with_stealth();
    }
    if let Some(c) = args.concurrency {
        config.concurrency = c;
    }
    if let Some(secs) = args.timeout {
        config.tool_timeout = Duration::from_secs(secs);
    }
    config.report_path = args.out.clone();
    config.report_format = ReportFormat::parse(&args.format).ok_or_else(|| {
        UltrascanError::Config(format!("unknown report format '{}' (text, json)", args.format))
    })?;
    config.liveness.enabled = !args.no_ping;
    config.liveness.timeout = Duration::from_secs(args.probe_timeout);
    config.liveness.method = ProbeMethod::parse(&args.probe).ok_or_else(|| {
        UltrascanError::Config(format!("unknown probe '{}' (auto, icmp, http)", args.probe))
    })?;
    if let Some(path) = &args.tools {
        config.tools = ToolTemplates::load(path)?;
    }
    config.artifacts_dir = args.artifacts.clone();
    config.validate()?;
    Ok(config)
}

fn feed_addr(host: &str, port: u16) -> Result<SocketAddr, UltrascanError> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| UltrascanError::Config(format!("invalid feed host '{host}': {e}")))?;
    Ok(SocketAddr::new(ip, port))
}

async fn run_scan(args: ScanArgs) -> Result<RunSummary, UltrascanError> {
    let config = build_run_config(&args)?;
    if let Some(max) = args.max_procs
        && max == 0
    {
        return Err(UltrascanError::InvalidConcurrency { value: max });
    }

    let catalog = ToolCatalog::detect(&config.tools);
    for tool in catalog.missing() {
        warn!(
            tool = %tool.label,
            program = %tool.program,
            "not found on PATH; its stage will be recorded as failed"
        );
    }

    let bus = EventBus::new(DEFAULT_BACKLOG);
    let events_file = match &args.events_out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Some(File::create(path).await?)
        }
        None => None,
    };
    let feed_shutdown = CancellationToken::new();
    let server = if args.serve {
        let (bound, server) = feed::serve(
            bus.clone(),
            feed_addr(&args.host, args.port)?,
            feed_shutdown.clone(),
        )?;
        info!("live feed at http://{}/stream", bound);
        bus.log(None, format!("Live feed: http://{bound}/stream"));
        Some(tokio::spawn(server))
    } else {
        None
    };

    let mut sinks: Vec<JoinHandle<Result<(), UltrascanError>>> = Vec::new();
    if !args.quiet {
        let events = bus.subscribe();
        sinks.push(tokio::spawn(async move {
            feed::print_console(events).await;
            Ok(())
        }));
    }
    if let Some(file) = events_file {
        let events = bus.subscribe();
        sinks.push(tokio::spawn(async move {
            feed::write_json_lines(events, file).await.map(|_| ())
        }));
    }

    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing running stages and saving results");
                cancel.cancel();
            }
        })
    };

    let invoker = match args.max_procs {
        Some(max) => ProcessInvoker::with_process_limit(max),
        None => ProcessInvoker::new(),
    };
    let result = ScanRun::new(config, Arc::new(invoker), bus.clone(), cancel)
        .execute()
        .await;

    bus.close();
    for sink in sinks {
        match sink.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "event sink failed"),
            Err(e) => warn!(error = %e, "event sink task aborted"),
        }
    }
    feed_shutdown.cancel();
    if let Some(server) = server
        && tokio::time::timeout(Duration::from_secs(5), server).await.is_err()
    {
        warn!("live feed did not shut down in time");
    }
    signal.abort();
    result
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} targets: {} alive, {} unreachable; {} completed, {} cancelled, {} failed, {} not started; {} findings",
        summary.loaded,
        summary.alive,
        summary.unreachable,
        summary.completed,
        summary.cancelled_jobs,
        summary.failed_jobs,
        summary.not_admitted,
        summary.findings
    );
    println!("report: {}", summary.report_path.display());
}

pub async fn run_from_args<I, T>(args: I) -> Result<(), UltrascanError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // initialize tracing according to log_level (ok if already initialized in tests)
    let env_filter = EnvFilter::new(cli.log_level.clone());
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    info!("Starting ultrascan, log_level={}", cli.log_level);

    match cli.cmd {
        Commands::Scan(args) => {
            let quiet = args.quiet;
            let summary = run_scan(args).await?;
            info!(
                completed = summary.completed,
                findings = summary.findings,
                cancelled = summary.cancelled,
                "run finished"
            );
            if !quiet {
                print_summary(&summary);
            }
        }
        Commands::Tools { tools, json } => {
            let templates = match tools {
                Some(path) => ToolTemplates::load(&path)?,
                None => ToolTemplates::default(),
            };
            let catalog = ToolCatalog::detect(&templates);
            if json {
                let text = serde_json::to_string_pretty(&catalog)
                    .map_err(|e| UltrascanError::ParseError(e.to_string()))?;
                println!("{text}");
            } else {
                for line in catalog.render_lines() {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub async fn run() -> Result<(), UltrascanError> {
    run_from_args(std::env::args()).await
}
