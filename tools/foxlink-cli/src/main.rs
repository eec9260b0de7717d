// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! foxlink - talk to a Foxglove WebSocket server from the command line.
//!
//! # Usage
//!
//! ```bash
//! # List topics and services
//! foxlink topics
//! foxlink services --json
//!
//! # Print 10 messages from a topic
//! foxlink echo /chatter -n 10
//!
//! # Publish at 2 Hz
//! foxlink pub /chatter std_msgs/msg/String '{"data": "hi"}' --rate 2 -n 0
//!
//! # Call a service, read and write parameters
//! foxlink call /add_two_ints '{"a": 1, "b": 2}'
//! foxlink param get /talker:use_sim_time
//! foxlink param set /talker:rate 5
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use foxlink::{Param, Session, SessionConfig};
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Inspect and drive a Foxglove WebSocket server
#[derive(Parser, Debug)]
#[command(name = "foxlink")]
#[command(version)]
#[command(about = "ROS-style topics, services and parameters over Foxglove WebSocket")]
struct Args {
    /// Server URL (overrides the config file)
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// TOML session config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins if set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List advertised topics
    Topics {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// How long to collect advertisements (ms)
        #[arg(long, default_value = "500")]
        wait: u64,
    },

    /// List advertised services
    Services {
        #[arg(long)]
        json: bool,

        #[arg(long, default_value = "500")]
        wait: u64,
    },

    /// Print messages received on a topic
    Echo {
        topic: String,

        /// Stop after this many messages (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },

    /// Publish a JSON message on a topic
    Pub {
        topic: String,
        message_type: String,
        message: String,

        /// Publish rate in Hz
        #[arg(short, long, default_value = "1")]
        rate: f64,

        /// Number of messages (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value = "1")]
        count: u64,
    },

    /// Call a service with a JSON request
    Call { service: String, request: String },

    /// Read or write a parameter
    Param {
        #[command(subcommand)]
        action: ParamCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ParamCommand {
    Get { name: String },
    /// Set a parameter to a JSON value
    Set { name: String, value: String },
}

fn load_config(args: &Args) -> Result<SessionConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig {
            name: "foxlink-cli".into(),
            ..SessionConfig::default()
        },
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let outcome = tokio::select! {
        outcome = run(&args) => outcome,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(args)?;
    info!("Connecting to {}", config.url);
    let session = Session::builder().config(config).connect()?;
    session.ready().await?;
    debug!("Session {} ready", session.id());

    let result = match &args.command {
        Command::Topics { json, wait } => topics(&session, *json, *wait).await,
        Command::Services { json, wait } => services(&session, *json, *wait).await,
        Command::Echo { topic, count } => echo(&session, topic, *count).await,
        Command::Pub {
            topic,
            message_type,
            message,
            rate,
            count,
        } => publish(&session, topic, message_type, message, *rate, *count).await,
        Command::Call { service, request } => call(&session, service, request).await,
        Command::Param { action } => param(&session, action).await,
    };
    session.close();
    result
}

async fn topics(session: &Session, json: bool, wait: u64) -> Result<(), Box<dyn Error>> {
    tokio::time::sleep(Duration::from_millis(wait)).await;
    let list = session.topics()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    let width = list.topics.iter().map(String::len).max().unwrap_or(0);
    for (topic, ty) in list.topics.iter().zip(&list.types) {
        let padded = format!("{:<width$}", topic, width = width);
        println!("{}  {}", padded.cyan(), ty.dimmed());
    }
    Ok(())
}

async fn services(session: &Session, json: bool, wait: u64) -> Result<(), Box<dyn Error>> {
    tokio::time::sleep(Duration::from_millis(wait)).await;
    let names = session.services()?;
    if json {
        let entries: Vec<Value> = names
            .iter()
            .map(|name| {
                let ty = session.service_type(name).ok().flatten();
                serde_json::json!({ "name": name, "type": ty })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for name in &names {
        let ty = session.service_type(name)?.unwrap_or_default();
        println!("{}  {}", name.cyan(), ty.dimmed());
    }
    Ok(())
}

async fn echo(session: &Session, topic: &str, count: u64) -> Result<(), Box<dyn Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    eprintln!(
        "{} {} {}",
        ">>>".green().bold(),
        "Subscribing to".bold(),
        topic.cyan()
    );
    let _subscription = session
        .create_subscription(topic, move |message| {
            let _ = tx.send(message);
        })
        .await?;

    let mut received = 0u64;
    while let Some(message) = rx.recv().await {
        received += 1;
        println!("{}", serde_json::to_string_pretty(&message)?);
        println!("{}", "---".dimmed());
        if count > 0 && received >= count {
            break;
        }
    }
    eprintln!("{} Received {} message(s)", "---".dimmed(), received);
    Ok(())
}

async fn publish(
    session: &Session,
    topic: &str,
    message_type: &str,
    message: &str,
    rate: f64,
    count: u64,
) -> Result<(), Box<dyn Error>> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(format!("invalid rate: {}", rate).into());
    }
    let message: Value = serde_json::from_str(message)?;
    let publisher = session.create_publisher(topic, message_type).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate));
    let mut sent = 0u64;
    while count == 0 || sent < count {
        ticker.tick().await;
        publisher.publish(&message)?;
        sent += 1;
        debug!("Published #{} on {}", sent, topic);
    }
    eprintln!("{} Published {} message(s)", "---".dimmed(), sent);
    publisher.unadvertise()?;
    Ok(())
}

async fn call(session: &Session, service: &str, request: &str) -> Result<(), Box<dyn Error>> {
    let request: Value = serde_json::from_str(request)?;
    let response = session.send_service_request(service, &request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn param(session: &Session, action: &ParamCommand) -> Result<(), Box<dyn Error>> {
    match action {
        ParamCommand::Get { name } => {
            let value = Param::new(session, name).get().await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        ParamCommand::Set { name, value } => {
            let value: Value = serde_json::from_str(value)?;
            let stored = Param::new(session, name).set(value).await?;
            println!("{} = {}", stored.name.cyan(), stored.value);
        }
    }
    Ok(())
}
