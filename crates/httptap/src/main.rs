//! httptap - kernel-probe HTTP request tracer
//!
//! Hooks the kernel's accept, connect and TCP receive paths and streams every
//! observed HTTP request as JSONL.

mod export;

use clap::{Parser, Subcommand};
use export::JsonlWriter;
use httptap_core::config::{self, ConfigLoader, TapConfig};
use httptap_core::tracer::Tracer;
use httptap_ebpf::probes;
use httptap_ebpf::HttpTracer;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "httptap")]
#[command(version)]
#[command(about = "Kernel-probe HTTP request tracer", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format (json, text)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "HTTPTAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the tracer and stream HTTP requests (requires root)
    Run {
        /// Observe every process and resolve process names
        #[arg(long)]
        system_wide: bool,

        /// Target process
        #[arg(short, long)]
        pid: Option<u32>,

        /// Load the debug build of the kernel-side program
        #[arg(long)]
        debug_bpf: bool,

        /// Directory holding the compiled kernel-side objects
        #[arg(long)]
        object_dir: Option<PathBuf>,

        /// Output file for JSONL records (stdout if unset)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the kernel probes the tracer attaches
    Probes {
        /// Show the system-wide probe set
        #[arg(long)]
        system_wide: bool,
    },

    /// Show system status and capabilities
    Status,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();
    let (tap_config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (TapConfig::default(), Some(e)),
    };

    // CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match tap_config.general.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    // Logs go to stderr so stdout stays clean JSONL
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    match cli.format.as_str() {
        "json" => tracing::subscriber::set_global_default(builder.json().finish())?,
        _ => tracing::subscriber::set_global_default(builder.finish())?,
    }

    match load_error {
        Some(e) => warn!("Failed to load configuration: {}, using defaults", e),
        None => info!("Configuration loaded"),
    }

    match cli.command {
        Commands::Run {
            system_wide,
            pid,
            debug_bpf,
            object_dir,
            output,
        } => {
            let merged =
                merge_run_config(tap_config, system_wide, pid, debug_bpf, object_dir, output);
            config::validate(&merged)?;
            run_command(merged).await
        }
        Commands::Probes { system_wide } => probes_command(system_wide),
        Commands::Status => status_command(),
        Commands::Config => {
            print!("{}", ConfigLoader::to_toml(&tap_config)?);
            Ok(())
        }
    }
}

/// Merge CLI arguments over config file settings
fn merge_run_config(
    mut config: TapConfig,
    system_wide: bool,
    pid: Option<u32>,
    debug_bpf: bool,
    object_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> TapConfig {
    if system_wide {
        config.tracer.system_wide = true;
    }
    if pid.is_some() {
        config.tracer.pid = pid;
    }
    if debug_bpf {
        config.tracer.bpf_debug = true;
    }
    if let Some(dir) = object_dir {
        config.tracer.object_dir = dir.display().to_string();
    }
    if let Some(path) = output {
        config.export.jsonl.path = Some(path.display().to_string());
    }
    config
}

async fn run_command(config: TapConfig) -> anyhow::Result<()> {
    info!("Starting httptap...");

    let tracer = HttpTracer::new(config.tracer.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (tx, mut rx) = mpsc::channel(config.tracer.channel_size);

    let mut writer = JsonlWriter::open(&config.export.jsonl)?;
    let writer_task = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = writer.write(&record) {
                error!("Failed to write record: {}", e);
                break;
            }
        }
        writer.finish()
    });

    let shutdown_rx = shutdown_tx.subscribe();
    let mut tracer_task = tokio::spawn(async move { tracer.run(shutdown_rx, tx).await });

    let finished = tokio::select! {
        finished = &mut tracer_task => finished,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, stopping tracer");
            let _ = shutdown_tx.send(());
            tracer_task.await
        }
    };
    let stats = finished??;

    let written = writer_task.await??;
    info!(
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        written,
        "httptap stopped ({:?})",
        stats.stop
    );
    if stats.close_failures > 0 {
        warn!("{} resources failed to release cleanly", stats.close_failures);
    }

    Ok(())
}

fn probes_command(system_wide: bool) -> anyhow::Result<()> {
    let tracer = HttpTracer::new(config::TracerSettings {
        system_wide,
        ..Default::default()
    });

    println!();
    println!("{} probes ({}):", tracer.name(), tracer.variant().object_name());
    println!();
    println!(
        "  {:<22} {:<6} {:<9} {:<28} {}",
        "FUNCTION", "ROLE", "REQUIRED", "PROGRAM", "SOURCE"
    );
    for probe in tracer.kprobes() {
        println!(
            "  {:<22} {:<6} {:<9} {:<28} {}",
            probe.function,
            probe.role.to_string(),
            probe.required,
            probe.program,
            probe.source
        );
    }
    println!();
    println!("  Programs loaded: {}", probes::programs(&tracer.kprobes()).len());
    for filter in tracer.socket_filters() {
        println!("  Socket filter: {}", filter);
    }
    println!();

    Ok(())
}

fn status_command() -> anyhow::Result<()> {
    println!();
    println!("httptap v{}", httptap_core::VERSION);
    println!();

    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    #[cfg(target_os = "linux")]
    {
        use httptap_ebpf::loader::{check_ebpf_available, is_root, kernel_version};

        println!();
        println!("Linux Capabilities:");
        println!("  Running as root: {}", is_root());
        println!("  eBPF supported: {}", check_ebpf_available());
        println!(
            "  BTF available: {}",
            std::path::Path::new("/sys/kernel/btf/vmlinux").exists()
        );
        match kernel_version() {
            Some(version) => println!("  Kernel: {}", version),
            None => println!("  Kernel: unknown"),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        println!();
        println!("Kernel probes are only available on Linux");
    }

    println!();

    Ok(())
}
