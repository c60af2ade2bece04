#![forbid(unsafe_code)]

//! `replmux-ctl` — local CLI companion for `replmux`.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "replmux-ctl",
    about = "Local CLI for the replmux daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "replmux")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show connection state and session ids.
    Status,

    /// Connect to an nREPL server.
    Connect {
        /// `host:port` to connect to. An empty host means the default host.
        endpoint: Option<String>,
        /// Use the published port file without prompting.
        #[arg(long)]
        auto: bool,
        /// Build target for the secondary REPL.
        #[arg(long)]
        build_target: Option<String>,
    },

    /// Close all sessions.
    Disconnect,

    /// Reset state and auto-connect again.
    Reconnect {
        /// Build target for the secondary REPL.
        #[arg(long)]
        build_target: Option<String>,
    },

    /// Switch ambiguous files to the other dialect session.
    Toggle,

    /// Replace the secondary session with a fresh one.
    RecreateSecondary {
        /// Build target for the new secondary REPL.
        #[arg(long)]
        build_target: Option<String>,
    },

    /// Look up documentation for a symbol.
    Info {
        /// Namespace to resolve the symbol in.
        ns: String,
        /// Symbol name.
        symbol: String,
    },

    /// Print recent output-channel lines.
    Output,
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::Status => serde_json::json!({ "command": "status" }),
        Command::Connect {
            endpoint,
            auto,
            build_target,
        } => serde_json::json!({
            "command": "connect",
            "endpoint": endpoint,
            "auto": auto,
            "build_target": build_target,
        }),
        Command::Disconnect => serde_json::json!({ "command": "disconnect" }),
        Command::Reconnect { build_target } => {
            serde_json::json!({ "command": "reconnect", "build_target": build_target })
        }
        Command::Toggle => serde_json::json!({ "command": "toggle" }),
        Command::RecreateSecondary { build_target } => {
            serde_json::json!({ "command": "recreate-secondary", "build_target": build_target })
        }
        Command::Info { ns, symbol } => {
            serde_json::json!({ "command": "info", "ns": ns, "symbol": symbol })
        }
        Command::Output => serde_json::json!({ "command": "output" }),
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    print_data(&args.command, obj.get("data"));
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is replmux running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Print a success payload. Output lines are printed raw.
fn print_data(command: &Command, data: Option<&serde_json::Value>) {
    let Some(data) = data else {
        println!("OK");
        return;
    };

    if let (Command::Output, Some(lines)) = (command, data.get("lines").and_then(|v| v.as_array())) {
        for line in lines.iter().filter_map(serde_json::Value::as_str) {
            println!("{line}");
        }
        return;
    }

    println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
