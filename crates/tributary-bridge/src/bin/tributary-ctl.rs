// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tributary Control CLI
//!
//! CLI tool for talking to an execution daemon through the bridge.
//!
//! Usage:
//!   tributary-ctl <command> [options]
//!
//! Commands:
//!   watch <pipeline_id> [--json]  Print events until the pipeline ends
//!   stop <pipeline_id>            Ask the daemon to stop a pipeline
//!   keytab <path>                 List the principals in a keytab

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tributary_bridge::{
    DaemonChannel, DaemonSession, EventKey, EventRegistry, FnHandler, Keytab, Message,
    RemoteSource, SessionConfig, StatusReport, StopMessage,
};

const EXIT_USAGE: u8 = 2;

fn print_usage() {
    eprintln!(
        r#"Usage: tributary-ctl <command> [options]

Talk to an execution daemon through the tributary bridge.

COMMANDS:
    watch <pipeline_id>             Print pipeline events until it ends
    stop <pipeline_id>              Ask the daemon to stop a pipeline
    keytab <path>                   List principals and key versions

WATCH OPTIONS:
    --json                          Print one JSON object per event

STOP OPTIONS:
    --reason <text>                 Reason phrase (default: "stopped by tributary-ctl")
    --hard                          Stop immediately instead of winding down

ENVIRONMENT:
    TRIBUTARY_DAEMON_HOST           Daemon host (default: localhost)
    TRIBUTARY_DAEMON_PORT           Daemon port (default: 53000)
    TRIBUTARY_USE_DAEMON            Daemon mode (default: true)
    TRIBUTARY_AUTH                  disabled | kerberos
    TRIBUTARY_KEYTAB                Keytab path
    TRIBUTARY_PRINCIPAL             Principal to log in as
    TRIBUTARY_SKIP_CERT_VERIFICATION  Skip TLS verification (default: false)

EXAMPLES:
    # Follow a running pipeline
    tributary-ctl watch p1

    # Stop it without waiting for in-flight rows
    tributary-ctl stop p1 --hard --reason "maintenance"
"#
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Watch {
        pipeline_id: String,
        json: bool,
    },
    Stop {
        pipeline_id: String,
        reason: String,
        hard: bool,
    },
    Keytab {
        path: PathBuf,
    },
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "watch" => {
            let pipeline_id = args.get(2).ok_or("Pipeline ID required")?.clone();
            let mut json = false;

            for arg in &args[3..] {
                match arg.as_str() {
                    "--json" => json = true,
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
            }

            Ok(Command::Watch { pipeline_id, json })
        }
        "stop" => {
            let pipeline_id = args.get(2).ok_or("Pipeline ID required")?.clone();
            let mut reason = "stopped by tributary-ctl".to_string();
            let mut hard = false;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--reason" => {
                        i += 1;
                        reason = args.get(i).ok_or("--reason requires a value")?.clone();
                    }
                    "--hard" => hard = true,
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Stop {
                pipeline_id,
                reason,
                hard,
            })
        }
        "keytab" => {
            let path = args.get(2).ok_or("Keytab path required")?;
            if let Some(extra) = args.get(3) {
                return Err(format!("Unknown argument: {}", extra));
            }
            Ok(Command::Keytab {
                path: PathBuf::from(path),
            })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "tributary_bridge=info"
                    .parse()
                    .expect("static directive parses"),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cmd = match parse_args() {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match execute_command(cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn connect() -> Result<DaemonSession, String> {
    let config =
        SessionConfig::from_env().map_err(|e| format!("Configuration error: {}", e))?;
    DaemonSession::connect(&config)
        .await
        .map_err(|e| format!("Failed to connect to daemon: {}", e))
}

async fn execute_command(cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Watch { pipeline_id, json } => watch(pipeline_id, json).await,

        Command::Stop {
            pipeline_id,
            reason,
            hard,
        } => {
            let session = connect().await?;
            let message = if hard {
                StopMessage::immediate(reason)
            } else {
                StopMessage::safe(reason)
            };
            let sent = session.send_message(&message).await;
            session.close().await;
            sent.map_err(|e| e.to_string())?;
            println!(
                "{} stop requested for {}",
                if hard { "Immediate" } else { "Safe" },
                pipeline_id
            );
            Ok(())
        }

        Command::Keytab { path } => {
            let keytab = Keytab::load(&path).await.map_err(|e| e.to_string())?;
            for entry in keytab.entries() {
                println!(
                    "{:<4} {:<6} {}",
                    entry.kvno,
                    entry.enctype,
                    entry.principal()
                );
            }
            Ok(())
        }

        Command::Help => {
            print_usage();
            Ok(())
        }
    }
}

fn render(message: &Message, json: bool) -> Result<String, String> {
    if json {
        return serde_json::to_string(message).map_err(|e| e.to_string());
    }
    Ok(match message {
        Message::Log { entry, .. } => format!(
            "{} [{:?}] {}",
            entry.timestamp.to_rfc3339(),
            entry.level,
            entry.message
        ),
        Message::Metrics { metrics, .. } => format!(
            "metrics in={} out={} dropped={} in_flight={}",
            metrics.entries_in, metrics.entries_out, metrics.dropped, metrics.in_flight
        ),
        Message::Status {
            report: StatusReport::State(state),
            ..
        } => format!("state {:?}", state),
        Message::Status {
            report: StatusReport::SubStatus(status),
            ..
        } => format!(
            "step {}.{} {} read={} written={} errors={}",
            status.step_name,
            status.copy,
            status.status_description,
            status.lines_read,
            status.lines_written,
            status.errors
        ),
        Message::Stop(stop) => format!("stop {}", stop.reason_phrase),
    })
}

async fn watch(pipeline_id: String, json: bool) -> Result<(), String> {
    let source = RemoteSource::transformation(pipeline_id);
    let registry = Arc::new(EventRegistry::new());
    let done = CancellationToken::new();

    for key in [
        EventKey::Log(source.clone()),
        EventKey::Metrics(source.clone()),
        EventKey::Status(source.clone()),
    ] {
        let id = format!("tributary-ctl:{}", key);
        let done = done.clone();
        let handler = FnHandler::shared(id, move |message: &Message| {
            match render(message, json) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to render event: {}", e),
            }
            if let Message::Status {
                report: StatusReport::State(state),
                ..
            } = message
                && state.is_terminal()
            {
                done.cancel();
            }
            Ok(())
        });
        registry.add_handler(key, handler).map_err(|e| e.to_string())?;
    }

    let session = connect().await?;
    session
        .start(Arc::clone(&registry))
        .await
        .map_err(|e| e.to_string())?;
    let closed = session.closed();

    let outcome = tokio::select! {
        _ = done.cancelled() => Ok(()),
        _ = closed.cancelled() => Err("Daemon closed the session before the pipeline ended".to_string()),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            Ok(())
        }
    };
    session.close().await;
    outcome
}
