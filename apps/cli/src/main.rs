use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    capture::{CaptureAdapter, ImageFileCamera, QrDecoder},
    config::load_settings,
    console::{format_response, intent_display_name},
    error::ClientError,
    health::Availability,
    scan::{
        CredentialValidator, ExpectedCredential, RemoteCredentialValidator, ScanController,
        ScanEvent, ScanOutcome,
    },
    session::post_login_target,
    VoiceOpsClient,
};
use tokio::sync::broadcast::{self, error::RecvError};
use shared::domain::{DeviceId, PowerState};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "voiceops", about = "Scan-to-login door access and device control")]
struct Cli {
    /// Settings file; `voiceops.toml` in the working directory is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode access codes from image files until one is accepted.
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Check the payload locally instead of asking the server.
        #[arg(long)]
        offline: bool,
        /// Keep cycling through the images until a code is accepted or Ctrl-C.
        #[arg(long)]
        repeat: bool,
        /// Return path from the auth page's `redirect` parameter.
        #[arg(long)]
        redirect: Option<String>,
    },
    Logout,
    Whoami,
    /// Fetch a page with the session cookies, without following redirects.
    Visit {
        path: String,
    },
    #[command(subcommand)]
    Device(DeviceCommand),
    /// Sound the buzzer for the configured pulse duration.
    Emergency,
    /// Probe the command interpreter.
    Health,
    /// Send a typed command to the interpreter.
    Say {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Record a spoken command through the interpreter's microphone.
    Listen {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Ask the interpreter to drive a device directly.
    Assist {
        device: String,
        command: String,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    Set { device: String, state: String },
    Toggle { device: String },
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    debug!(?settings, "settings loaded");
    let client = VoiceOpsClient::connect(settings).await?;

    match cli.command {
        Command::Scan {
            images,
            offline,
            repeat,
            redirect,
        } => scan(&client, images, offline, repeat, redirect.as_deref()).await?,
        Command::Logout => {
            let target = client.session().logout().await;
            println!("Signed out; continue at {target}");
        }
        Command::Whoami => match client.session().restore().await? {
            Some(identity) => {
                let expires = client
                    .session()
                    .current_record()
                    .await
                    .map(|record| record.expires_at.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{} ({}, id {}) until {expires}",
                    identity.display_name, identity.kind, identity.id
                );
            }
            None => println!("Not signed in"),
        },
        Command::Visit { path } => {
            let visit = client.visit(&path).await?;
            println!("{}", visit.status);
            if let Some(location) = visit.location {
                println!("Location: {location}");
            }
            if !visit.body.is_empty() {
                println!("{}", visit.body);
            }
        }
        Command::Device(command) => device(&client, command).await?,
        Command::Emergency => {
            client.require_session().await?;
            client.dispatcher().load_states().await;
            let (message, shutoff) = client.console().emergency_pulse().await?;
            println!("{message}");
            shutoff.await.context("buzzer shutoff task failed")?;
        }
        Command::Health => match client.health().check_availability().await {
            Availability::Available(status) => {
                println!("{} is {}", status.service, status.status);
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Availability::Unavailable { reason } => println!("Interpreter unavailable: {reason}"),
        },
        Command::Say { text } => {
            client.require_session().await?;
            match client.console().submit_text(&text.join(" ")).await {
                Some(response) => print_command_result(&response),
                None => println!("Nothing to send"),
            }
        }
        Command::Listen { seconds } => {
            client.require_session().await?;
            client.health().check_availability().await;
            let response = client.console().listen(seconds).await?;
            print_command_result(&response);
        }
        Command::Assist { device, command } => {
            client.require_session().await?;
            let response = client.console().control_device(&device, &command).await;
            print_command_result(&response);
        }
    }

    Ok(())
}

async fn scan(
    client: &VoiceOpsClient,
    images: Vec<PathBuf>,
    offline: bool,
    repeat: bool,
    redirect: Option<&str>,
) -> Result<()> {
    let settings = client.settings();
    let camera = ImageFileCamera::new(images);
    let camera = if repeat { camera.repeating() } else { camera };
    let adapter = CaptureAdapter::new(Arc::new(camera), Arc::new(QrDecoder))
        .with_frame_interval(settings.frame_interval());
    let validator: Arc<dyn CredentialValidator> = if offline {
        Arc::new(ExpectedCredential {
            payload: settings.expected_payload.clone(),
            ..ExpectedCredential::default()
        })
    } else {
        Arc::new(RemoteCredentialValidator::new(
            client.http().clone(),
            settings.server_url.clone(),
        ))
    };
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let mut controller = ScanController::new(validator);
    let rejections = tokio::spawn(print_rejections(controller.subscribe()));
    let outcome = client.scan_and_login(&mut controller, &adapter, cancel).await;
    // Closes the event channel so the printer drains and exits.
    drop(controller);
    rejections.await.context("scan event printer failed")?;

    match outcome? {
        ScanOutcome::Authenticated { credential, .. } => {
            println!(
                "{}",
                credential
                    .message
                    .as_deref()
                    .unwrap_or("Authentication successful!")
            );
            println!("Welcome, {}", credential.identity.display_name);
            if let Some(warning) = credential.warning {
                println!("Warning: {warning}");
            }
            println!("Continue at {}", post_login_target(redirect));
        }
        ScanOutcome::Cancelled => println!("Scan cancelled"),
        ScanOutcome::FeedEnded => println!("No accepted code found"),
        ScanOutcome::AlreadyActive => println!("Another scan is already using the camera"),
        ScanOutcome::AlreadyAuthenticated => println!("This scan has already signed someone in"),
    }
    Ok(())
}

async fn print_rejections(mut events: broadcast::Receiver<ScanEvent>) {
    loop {
        match events.recv().await {
            Ok(ScanEvent::Rejected { message }) => eprintln!("{message}"),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

async fn device(client: &VoiceOpsClient, command: DeviceCommand) -> Result<()> {
    client.require_session().await?;
    let dispatcher = client.dispatcher();
    dispatcher.load_states().await;

    match command {
        DeviceCommand::Set { device, state } => {
            let device = resolve(client, &device)?;
            let state: PowerState = state.parse()?;
            let confirmed = dispatcher.set_device(&device, state).await?;
            println!("{device}: {confirmed}");
        }
        DeviceCommand::Toggle { device } => {
            let device = resolve(client, &device)?;
            let confirmed = dispatcher.toggle(&device).await?;
            println!("{device}: {confirmed}");
        }
        DeviceCommand::Status => {
            for state in dispatcher.snapshot().await {
                let pending = if state.is_settled() { "" } else { " (pending)" };
                println!("{}: {}{pending}", state.device_id, state.confirmed);
            }
        }
    }
    Ok(())
}

fn resolve(client: &VoiceOpsClient, name: &str) -> Result<DeviceId, ClientError> {
    client
        .dispatcher()
        .registry()
        .resolve(name)
        .ok_or_else(|| ClientError::UnknownDevice(name.to_string()))
}

fn print_command_result(response: &shared::protocol::VoiceCommandResponse) {
    println!(
        "[{}] {}",
        intent_display_name(response.intent.as_deref()),
        format_response(response)
    );
}
