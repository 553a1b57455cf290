//! # Idle Server
//!
//! Ticks every stored player on a fixed interval and accepts commands on
//! stdin, one per line: `<player> <command>`.
//!
//! ## Usage
//!
//! ```bash
//! idle_server --config idle.toml --duration 60
//! echo "alice create" | idle_server
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use idlecore_server::{init_tracing, Command, Server, ServerConfig};
use tokio::sync::mpsc;

const USAGE: &str = "\
Usage: idle_server [OPTIONS]

Options:
  -c, --config <PATH>        Server config TOML (default: built-in defaults)
  -t, --tick-ms <MS>         Override tick interval
  -d, --duration <SECS>      Run for N seconds then exit
  -h, --help                 Show this help

Stdin: one `<player> <command>` per line; `<player> help` lists commands.";

struct Args {
    config: Option<PathBuf>,
    tick_ms: Option<u64>,
    duration_secs: Option<u64>,
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        config: None,
        tick_ms: None,
        duration_secs: None,
    };
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        let value = argv.get(i + 1);
        match argv[i].as_str() {
            "--config" | "-c" => {
                args.config = value.map(PathBuf::from);
                i += 1;
            }
            "--tick-ms" | "-t" => {
                args.tick_ms = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--duration" | "-d" => {
                args.duration_secs = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return None;
            }
            other => eprintln!("ignoring unknown argument {other:?}"),
        }
        i += 1;
    }
    Some(args)
}

/// Forwards stdin lines into the runtime from a plain thread.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn handle_line(server: &Server, line: &str) -> String {
    let line = line.trim();
    let Some((player, rest)) = line.split_once(char::is_whitespace) else {
        return format!("expected `<player> <command>`, got {line:?}");
    };
    match Command::parse(rest).and_then(|command| server.service().execute(player, &command)) {
        Ok(reply) => reply,
        Err(error) => format!("error: {error}"),
    }
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let Some(args) = parse_args() else {
        return;
    };

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(error) => {
                tracing::error!(%error, "startup failed");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    let server = match Server::from_config(&config) {
        Ok(server) => Arc::new(server),
        Err(error) => {
            tracing::error!(%error, "startup failed");
            std::process::exit(1);
        }
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         IDLECORE SERVER                                          ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!("│ Catalog:            {}", config.catalog_path.display());
    println!("│ Player Store:       {}", config.data_dir.display());
    println!("│ Tick Interval:      {} ms", config.tick_interval_ms);
    println!("│ Max Concurrent:     {}", config.max_concurrent_players);
    println!();

    let mut commands = spawn_stdin_reader();
    let command_server = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(line) = commands.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            let server = Arc::clone(&command_server);
            match tokio::task::spawn_blocking(move || handle_line(&server, &line)).await {
                Ok(reply) => println!("{reply}"),
                Err(error) => tracing::warn!(%error, "command task aborted"),
            }
        }
    });

    let shutdown = async move {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::warn!(%error, "ctrl-c handler unavailable, running until killed");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    server.scheduler().run(shutdown).await;

    let stats = server.scheduler().stats();
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SERVER SHUTDOWN                               ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║ Total Ticks:        {:>10}", stats.total_ticks);
    println!("║ Avg Tick Time:      {:>10} μs", stats.avg_tick_us);
    println!("║ Late Ticks:         {:>10}", stats.late_ticks);
    println!("║ Players Updated:    {:>10}", stats.players_updated);
    println!("║ Player Failures:    {:>10}", stats.player_failures);
    println!("╚══════════════════════════════════════════════════════════════════╝");
}
