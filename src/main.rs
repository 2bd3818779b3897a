use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roomcall::config::{ClientConfig, ServerConfig, DEFAULT_PORT, DEFAULT_STUN_SERVERS};
use roomcall::peer::TrackKind;
use roomcall::rtc::RtcEngine;
use roomcall::{server, Session, SessionEvent, SessionHandle, SignalingClient};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mesh video rooms over WebRTC")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling server.
    Serve(ServeArgs),
    /// Join a room from the terminal. Lines on stdin are sent as chat;
    /// `/share`, `/camera`, `/mute`, `/video` and `/leave` control the call.
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on. Overrides --port.
    #[arg(long, env = "ROOMCALL_BIND")]
    bind: Option<String>,
    /// Port to listen on, on all interfaces.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Args, Debug)]
struct CallArgs {
    /// Signaling server URL.
    #[arg(long, env = "ROOMCALL_SERVER", default_value = "ws://127.0.0.1:3000")]
    server: String,
    /// Name shown to the other participants.
    #[arg(long, default_value = "Guest")]
    name: String,
    /// Room to join. A new room is created when omitted.
    #[arg(long)]
    room: Option<String>,
    /// STUN/TURN URLs, comma separated.
    #[arg(long, value_delimiter = ',')]
    stun: Vec<String>,
    #[arg(long)]
    no_video: bool,
    #[arg(long)]
    no_audio: bool,
    /// Refuse screen sharing.
    #[arg(long)]
    no_screen: bool,
}

impl CallArgs {
    fn into_config(self) -> ClientConfig {
        let ice_servers = if self.stun.is_empty() {
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.stun
        };
        ClientConfig {
            server_url: self.server,
            display_name: self.name,
            room_id: self.room,
            ice_servers,
            audio: !self.no_audio,
            video: !self.no_video,
            screen_share: !self.no_screen,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => {
            let config = ServerConfig {
                bind_address: args
                    .bind
                    .unwrap_or_else(|| format!("0.0.0.0:{}", args.port)),
            };
            server::run(&config)
                .await
                .with_context(|| format!("signaling server on {} failed", config.bind_address))
        }
        Command::Call(args) => call(args.into_config()).await,
    }
}

async fn call(config: ClientConfig) -> Result<()> {
    let engine = Arc::new(RtcEngine::new(&config)?);
    let signaling = SignalingClient::connect(&config.server_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.server_url))?;
    let (outbound, inbound) = signaling.into_parts();

    let mut session = Session::start(
        engine,
        config.display_name.clone(),
        config.constraints(),
        outbound,
        inbound,
    )
    .await
    .context("failed to open local media")?;

    match &config.room_id {
        Some(room_id) => session.join_room(room_id.clone())?,
        None => session.create_room()?,
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sending = Sending::default();
    let mut leaving = false;
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(SessionEvent::Disconnected) | None => break,
                Some(event) => report(&event),
            },
            line = lines.next_line(), if !leaving => match line? {
                Some(line) => leaving = handle_line(&session, &mut sending, line.trim()).await?,
                None => {
                    session.leave()?;
                    leaving = true;
                }
            },
            _ = tokio::signal::ctrl_c(), if !leaving => {
                session.leave()?;
                leaving = true;
            }
        }
    }

    info!("Call ended");
    Ok(())
}

/// Which local tracks are paused from the prompt.
#[derive(Debug, Default)]
struct Sending {
    muted: bool,
    video_paused: bool,
}

/// Returns true once the user asked to leave.
async fn handle_line(session: &SessionHandle, sending: &mut Sending, line: &str) -> Result<bool> {
    match line {
        "" => {}
        "/leave" => {
            session.leave()?;
            return Ok(true);
        }
        "/share" => match session.share_screen().await {
            Ok(report) => info!(
                "Screen shared on {} links, {} failed",
                report.replaced.len(),
                report.failed.len()
            ),
            Err(e) => warn!("Screen share failed: {}", e),
        },
        "/camera" => match session.stop_screen_share().await {
            Ok(report) => info!("Camera restored on {} links", report.replaced.len()),
            Err(e) => warn!("Could not restore camera: {}", e),
        },
        "/mute" => {
            sending.muted = !sending.muted;
            session.set_track_enabled(TrackKind::Audio, !sending.muted)?;
            println!("Microphone {}", if sending.muted { "muted" } else { "on" });
        }
        "/video" => {
            sending.video_paused = !sending.video_paused;
            session.set_track_enabled(TrackKind::Video, !sending.video_paused)?;
            println!("Video {}", if sending.video_paused { "paused" } else { "on" });
        }
        text => session.send_chat(text)?,
    }
    Ok(false)
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::RoomCreated { room_id } => println!("Room created: {}", room_id),
        SessionEvent::Joined { room_id, members } => {
            println!("Joined {} with {} others", room_id, members.len())
        }
        SessionEvent::ServerError { code, message } => {
            warn!("Server rejected request ({:?}): {}", code, message)
        }
        SessionEvent::ParticipantJoined { display_name, .. } => {
            println!("{} joined", display_name)
        }
        SessionEvent::ParticipantLeft { display_name, .. } => println!("{} left", display_name),
        SessionEvent::Chat(entry) => {
            let who = if entry.own { "you" } else { entry.display_name.as_str() };
            println!(
                "[{}] {}: {}",
                entry.timestamp.format("%H:%M:%S"),
                who,
                entry.text
            );
        }
        SessionEvent::ScreenShareEnded(report) => println!(
            "Screen share ended, camera back on {} links",
            report.replaced.len()
        ),
        other => info!("{:?}", other),
    }
}
