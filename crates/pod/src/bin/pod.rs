//! Pod CLI - provision a GPU pod, launch the workload, open it in a browser.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pod::acquire;
use pod::config::Config;
use pod::{probe, ssh, state, tmux, RunPodClient, ShellSession};

/// SSH connection attempts before giving up.
const MAX_SSH_RETRIES: u32 = 30;

/// Timeout for the workload health probe.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// Settle time after starting the workload session.
const SERVER_SETTLE_SECS: u64 = 5;

/// Provision and manage a single GPU pod on RunPod.
#[derive(Parser)]
#[command(name = "pod")]
#[command(about = "Provision a GPU pod, launch the workload, open its endpoint")]
struct Cli {
    /// RunPod API key (or set `RUNPOD_API_KEY` env var).
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,

    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Username override (otherwise `.user.yaml` or an interactive prompt).
    #[arg(long)]
    user: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Terminate the persisted latest pod and forget it.
    Destroy,

    /// Stop the persisted latest pod without deleting it.
    #[command(alias = "stop")]
    Pause,

    /// List all pods on the account.
    List,

    /// List available GPU types.
    Gpus,
}

/// Print a fatal diagnostic and exit nonzero.
fn fatal(message: impl Display) -> ! {
    println!("ERROR: {message}");
    std::process::exit(1);
}

fn print_section(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("{}", title.bold());
    println!("{}", "=".repeat(80));
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let api_key = cli.api_key.trim().to_string();
    if api_key.is_empty() {
        fatal("RUNPOD_API_KEY not set in environment");
    }

    let result = match &cli.command {
        Some(Commands::Destroy) => destroy(&cli, &api_key).await,
        Some(Commands::Pause) => pause(&cli, &api_key).await,
        Some(Commands::List) => list(&cli, &api_key).await,
        Some(Commands::Gpus) => gpus(&cli, &api_key).await,
        None => launch(&cli, &api_key).await,
    };

    if let Err(e) = result {
        fatal(e);
    }
}

/// Full acquire → connect → launch → open flow.
async fn launch(cli: &Cli, api_key: &str) -> Result<()> {
    let cfg = Config::load(&cli.config)?;
    let state_dir = Path::new(".");

    let user_override = cli.user.as_deref().or(cfg.user_name.as_deref());
    let user = state::get_or_prompt_user(state_dir, user_override)?;

    print_section("RunPod CLI Dashboard");
    println!("User: {user}");

    let client = RunPodClient::new(api_key, &cfg.api_url)?;

    // Ctrl-C interrupts the poll loops and the log stream cleanly.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    // Step 1: get or create a ready pod.
    let pod_id = match acquire::acquire_pod(&client, &cfg, &user, state_dir, &token).await {
        Ok(id) => id,
        Err(e) => fatal(e),
    };

    // Step 2: fetch full details and extract connection info.
    println!("\n2. Fetching pod information...");
    let Some(pod) = client.get_pod(&pod_id).await? else {
        fatal(format!("Pod {pod_id} not found"));
    };
    println!("   Pod Name: {}", pod.name);
    println!("   Pod ID: {}", pod.id);

    let Some(runtime) = &pod.runtime else {
        fatal("Pod is not running");
    };
    println!("\n   Available Ports:");
    for port in &runtime.ports {
        println!(
            "   - Type: {:?}, IP: {}, Port: {}, Public: {}",
            port.kind, port.ip, port.public_port, port.is_ip_public
        );
    }
    println!("   Uptime: {} seconds", runtime.uptime_in_seconds);

    let endpoints = match acquire::find_endpoints(&pod, cfg.app_port) {
        Ok(endpoints) => endpoints,
        Err(e) => fatal(e),
    };

    // Step 3: SSH in.
    println!(
        "\n3. Connecting to SSH: {}:{}",
        endpoints.ssh.ip, endpoints.ssh.public_port
    );
    let mut shell = ShellSession::new(
        endpoints.ssh.ip.clone(),
        endpoints.ssh.public_port,
        cfg.ssh.username.clone(),
        Duration::from_secs(cfg.ssh.timeout),
    );
    if !shell.connect(&pod_id, MAX_SSH_RETRIES, &token).await {
        fatal("Failed to connect via SSH");
    }

    let session_name = cfg.session_name(&pod_id);
    let log_file = cfg.log_file(&pod_id);

    // Step 4: is the workload already up?
    let tmux_exists = tmux::session_exists(&shell, &session_name)?;
    let http_running = probe::http_server_running(
        &endpoints.app.ip,
        endpoints.app.public_port,
        Duration::from_secs(PROBE_TIMEOUT_SECS),
    )
    .await;

    println!("\n4. Checking existing session and server status...");
    println!(
        "   tmux session '{session_name}': {}",
        if tmux_exists { "exists" } else { "not found" }
    );
    println!(
        "   HTTP server: {}",
        if http_running { "running" } else { "not running" }
    );

    let mut should_start = true;
    if tmux_exists && http_running {
        if cfg.restart_command {
            println!("   restart_command=true - killing existing tmux session");
            tmux::kill_session(&shell, &session_name)?;
        } else {
            println!("   Both session and server are running - skipping command execution");
            should_start = false;
        }
    }

    // Step 5: start the workload if needed.
    if should_start {
        println!("\n5. Starting workload in tmux session '{session_name}'...");
        if !tmux::create_session_with_logging(&shell, &session_name, &cfg.remote_command, &log_file)? {
            shell.close();
            fatal("Failed to create tmux session");
        }
        println!("   tmux session created successfully");
        println!("   Waiting for the server to initialize...");
        tokio::time::sleep(Duration::from_secs(SERVER_SETTLE_SECS)).await;
    }

    // Conveniences; every failure here is a warning, not an abort.
    if cfg.update_ssh_config
        && ssh::update_ssh_config(
            &pod.name,
            &endpoints.ssh.ip,
            endpoints.ssh.public_port,
            &cfg.ssh.username,
        )
    {
        println!("   SSH config alias '{}' updated", pod.name);
    }
    if let Some(git) = &cfg.git {
        match ssh::configure_git(&shell, &git.name, &git.email) {
            Ok(true) => println!("   Git identity configured on pod"),
            Ok(false) | Err(_) => println!("   Warning: could not configure git identity"),
        }
    }

    // Step 6/7: report and open the endpoint.
    let app_url = format!("http://{}:{}/", endpoints.app.ip, endpoints.app.public_port);
    println!("\n6. Pod HTTP Endpoint: {app_url}");

    println!("\n7. Opening {app_url} in browser...");
    match open::that(&app_url) {
        Ok(()) => println!("   Browser opened successfully!"),
        Err(e) => {
            println!("   Failed to open browser: {e}");
            println!("   Please manually open: {app_url}");
        }
    }

    // Step 8: optionally follow the workload log until Ctrl-C.
    if cfg.stream_output {
        tmux::stream_output(&shell, &log_file, &token).await?;
    }

    shell.close();

    print_section("Done!");
    println!("\nPod ID: {pod_id}");
    println!("Remember to stop/destroy the pod when you're done to avoid charges!");
    Ok(())
}

/// Terminate the persisted latest pod.
async fn destroy(cli: &Cli, api_key: &str) -> Result<()> {
    print_section("RunPod Shutdown");

    let cfg = Config::load(&cli.config)?;
    let state_dir = Path::new(".");
    let Some(pod_id) = state::get_latest_pod_id(state_dir) else {
        fatal("No pod found in .latest_pod file\nCannot determine which pod to shut down");
    };
    println!("Found pod ID: {pod_id}");

    let client = RunPodClient::new(api_key, &cfg.api_url)?;
    if client.terminate_pod(&pod_id).await? {
        println!("\nSuccessfully shut down pod {pod_id}");
        state::clear_latest_pod_id(state_dir);
        Ok(())
    } else {
        fatal(format!("Failed to shut down pod {pod_id}"));
    }
}

/// Stop the persisted latest pod without deleting it.
async fn pause(cli: &Cli, api_key: &str) -> Result<()> {
    print_section("RunPod Pause");

    let cfg = Config::load(&cli.config)?;
    let state_dir = Path::new(".");
    let Some(pod_id) = state::get_latest_pod_id(state_dir) else {
        fatal("No pod found in .latest_pod file\nCannot determine which pod to pause");
    };
    println!("Found pod ID: {pod_id}");

    let client = RunPodClient::new(api_key, &cfg.api_url)?;
    if client.stop_pod(&pod_id).await? {
        println!("\nSuccessfully paused pod {pod_id}");
        println!("Pod can be resumed later with the 'reuse' feature");
        Ok(())
    } else {
        fatal(format!("Failed to pause pod {pod_id}"));
    }
}

/// Table of all pods on the account.
async fn list(cli: &Cli, api_key: &str) -> Result<()> {
    let cfg = Config::load(&cli.config)?;
    let client = RunPodClient::new(api_key, &cfg.api_url)?;
    let pods = client.list_pods().await?;

    println!("\n{:<16} {:<28} {:<10} {:<24}", "ID", "NAME", "STATE", "GPU");
    println!("{}", "-".repeat(80));
    for pod in pods {
        let state = if pod.is_running() { "running" } else { "stopped" };
        println!(
            "{:<16} {:<28} {:<10} {:<24}",
            pod.id,
            pod.name,
            state,
            pod.gpu_type_id().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

/// Table of the GPU type catalog.
async fn gpus(cli: &Cli, api_key: &str) -> Result<()> {
    let cfg = Config::load(&cli.config)?;
    let client = RunPodClient::new(api_key, &cfg.api_url)?;
    let types = client.gpu_types().await?;

    println!("\n{:<36} {:<28} {:>8}", "ID", "NAME", "MEM(GB)");
    println!("{}", "-".repeat(74));
    for gpu in types {
        println!(
            "{:<36} {:<28} {:>8}",
            gpu.id,
            gpu.display_name,
            gpu.memory_in_gb
                .map_or_else(|| "-".to_string(), |m| m.to_string())
        );
    }
    println!();
    Ok(())
}
