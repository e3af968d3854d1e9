//! Mura Trading Terminal
//!
//! Line-driven front end for the Mura dashboard: every feature shares one
//! Deriv WebSocket connection through the session loop.

mod commands;
mod config;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mura_deriv::{ConnectionConfig, DerivConnection};
use mura_services::{
    resolve_api_token, IdentityService, InMemoryIdentity, InMemorySettings, Session,
    SessionCommand,
};

use commands::Input;
use config::TerminalConfig;

/// UI commands waiting for the session loop
const COMMAND_BUFFER: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mura_terminal=debug")),
        )
        .init();

    info!("Starting Mura Trading Terminal");

    let config = TerminalConfig::from_env()?;

    // Sign in so the token can come from the user's stored settings
    let identity = match &config.login {
        Some(login) => {
            let identity = InMemoryIdentity::new().with_account(&login.email, &login.password);
            identity
                .sign_in_with_password(&login.email, &login.password)
                .await?;
            info!("Signed in as {}", login.email);
            identity
        }
        None => InMemoryIdentity::new(),
    };
    let settings = InMemorySettings::new();
    let api_token = resolve_api_token(&identity, &settings, config.api_token.clone()).await?;
    if api_token.is_some() {
        info!("Deriv API token configured");
    } else {
        info!("No Deriv API token found (DERIV_API_TOKEN) - account features will show an error");
    }

    let connection = DerivConnection::new(ConnectionConfig::from_env()?);
    info!("Connecting to {}", connection.endpoint());

    // Subscribe before connecting so the first `Open` is not missed
    let events = connection.subscribe_events();
    connection.connect();

    let mut session = Session::new(connection.clone(), api_token);
    let snapshots = session.snapshots();
    for kind in &config.features {
        session.mount(*kind).await?;
    }

    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let session_task = tokio::spawn(session.run(events, command_rx));

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(Input::Session(SessionCommand::Shutdown))) => break,
                    Ok(Some(Input::Session(command))) => {
                        if command_tx.send(command).await.is_err() {
                            warn!("Session loop has stopped");
                            break;
                        }
                    }
                    Ok(Some(Input::Status)) => {
                        let snapshot = snapshots.borrow().clone();
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    Ok(Some(Input::Help)) => println!("{}", commands::HELP),
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    info!("Shutting down");
    // The loop may already be gone
    let _ = command_tx.send(SessionCommand::Shutdown).await;
    session_task.await?;
    connection.shutdown();

    Ok(())
}
