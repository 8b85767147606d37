//! Shell Init - per-session service supervisor with a Unix socket control plane.

use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shell_init::bus::OutputBus;
use shell_init::config::{Configuration, Settings};
use shell_init::control::CommandRegistry;
use shell_init::services::{self, ShellSignal, Supervisor};
use shell_init::socket::SocketListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_CONFIG_PATH: &str = "shell.toml";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let configuration = match Configuration::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading services: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings);

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Socket path: {}", settings.socket.path.display());
    info!(services = configuration.services.len(), "Services configured");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings, configuration)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Shell init failed");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(
    settings: Settings,
    configuration: Configuration,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Arc::new(settings);
    let bus = OutputBus::new(settings.supervisor.output_buffer);
    let supervisor = Arc::new(Supervisor::new(
        configuration,
        settings.supervisor.stop_timeout(),
        bus.clone(),
    ));

    let (shell_tx, shell_rx) = mpsc::channel(8);
    let registry = Arc::new(CommandRegistry::new(
        Arc::clone(&supervisor),
        shell_tx.clone(),
    ));
    let listener = Arc::new(SocketListener::bind(Arc::clone(&settings), registry, bus).await?);

    supervisor.start_all().await;

    tokio::spawn(async move {
        if let Err(e) = forward_os_signals(shell_tx).await {
            error!(error = %e, "Failed to install signal handlers");
        }
    });

    let shutdown = Arc::new(Notify::new());
    let listener_task = {
        let listener = Arc::clone(&listener);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { listener.run(shutdown).await })
    };

    let teardown = services::run(Arc::clone(&supervisor), shell_rx).await;

    shutdown.notify_waiters();
    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Socket listener failed"),
        Err(e) => error!(error = %e, "Socket listener task failed"),
    }
    listener.wait_for_drain(DRAIN_TIMEOUT).await;

    if let Err(e) = teardown {
        warn!(error = %e, "Some services did not stop cleanly");
        return Err(e.into());
    }

    info!("Shell init stopped");
    Ok(())
}

/// Translate OS signals into shell requests: SIGHUP restarts the shell,
/// SIGTERM and Ctrl+C quit it.
async fn forward_os_signals(shell: mpsc::Sender<ShellSignal>) -> io::Result<()> {
    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    let mut hangup = signal::unix::signal(SignalKind::hangup())?;

    loop {
        let request = tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                ShellSignal::Quit
            }
            _ = terminate.recv() => ShellSignal::Quit,
            _ = hangup.recv() => ShellSignal::Restart,
        };

        info!(request = ?request, "Signal received");
        if shell.send(request).await.is_err() {
            return Ok(());
        }
    }
}

fn print_help() {
    println!(
        r#"{} {}
Per-session service supervisor for a desktop shell.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGHUP                 Stop all services, reload the configuration, start again
    SIGTERM, SIGINT        Stop all services and exit
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

/// Initialize logging; `RUST_LOG` overrides the configured level.
fn init_logging(settings: &Settings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}
