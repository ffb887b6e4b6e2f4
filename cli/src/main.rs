use std::time::Duration;

use canvas::stroke::{Point, Tool};
use canvas::sync::{Identity, SyncClient, SyncError, SyncEvent};
use clap::{Args, Parser, Subcommand, ValueEnum};
use frames::{Frame, Status, syscall};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    #[error("invalid point `{0}`; expected x,y")]
    InvalidPoint(String),
    #[error("at least one point is required")]
    NoPoints,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "sketch", about = "Shared whiteboard HTTP and websocket CLI")]
struct Cli {
    #[arg(long, env = "SKETCH_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Display name announced on join.
    #[arg(long, env = "SKETCH_NAME", default_value = "sketch-cli")]
    name: String,

    #[arg(long, env = "SKETCH_EMAIL", default_value = "")]
    email: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    identity: Identity,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// List live sessions.
    Sessions,
    /// Print the committed strokes of a live session.
    Strokes {
        #[arg(long)]
        session: Uuid,
    },
    Draw(DrawArgs),
    Clear {
        #[arg(long)]
        session: Uuid,
    },
    /// Join and print every inbound frame as a JSON line.
    Watch(WatchArgs),
    Chat {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ToolArg {
    Pen,
    Eraser,
}

impl From<ToolArg> for Tool {
    fn from(tool: ToolArg) -> Self {
        match tool {
            ToolArg::Pen => Self::Pen,
            ToolArg::Eraser => Self::Eraser,
        }
    }
}

#[derive(Args, Debug)]
struct DrawArgs {
    #[arg(long)]
    session: Uuid,

    #[arg(long, value_enum, default_value_t = ToolArg::Pen)]
    tool: ToolArg,

    #[arg(long, default_value = "red")]
    color: String,

    #[arg(long, default_value_t = 5)]
    width: u32,

    /// Space-separated `x,y` pairs, e.g. "0,0 10,10 20,5".
    #[arg(long)]
    points: String,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long)]
    session: Uuid,

    #[arg(long, help = "Stop after this many frames")]
    max_frames: Option<usize>,

    #[arg(long, default_value_t = false)]
    cursors: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext {
        base_url: cli.base_url,
        identity: Identity { name: cli.name, email: cli.email, color: None },
    };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Sessions => {
            let json = api_get(&ctx, "/api/sessions").await?;
            print_json(&json)
        }
        Command::Strokes { session } => {
            let json = api_get(&ctx, &format!("/api/sessions/{session}/strokes")).await?;
            print_json(&json)
        }
        Command::Draw(args) => run_draw(&ctx, args).await,
        Command::Clear { session } => run_clear(&ctx, session).await,
        Command::Watch(args) => run_watch(&ctx, args).await,
        Command::Chat { session, message } => run_chat(&ctx, session, message).await,
    }
}

// =============================================================================
// HTTP
// =============================================================================

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn api_get(cli: &CliContext, path: &str) -> Result<Value, CliError> {
    let url = format!("{}{}", cli.base_url.trim_end_matches('/'), path);
    let response = reqwest::Client::new().get(&url).send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: value.to_string(),
        });
    }
    Ok(value)
}

// =============================================================================
// WEBSOCKET COMMANDS
// =============================================================================

async fn run_draw(cli: &CliContext, args: DrawArgs) -> Result<(), CliError> {
    let points = parse_points(&args.points)?;
    let Some((&origin, rest)) = points.split_first() else {
        return Err(CliError::NoPoints);
    };

    let mut live = LiveSession::join(cli, args.session).await?;
    let (handle, begin) = live.client.begin_stroke(args.tool.into(), args.color, args.width, origin)?;
    live.send(&begin).await?;
    let ack = live.await_reply(&begin).await?;

    for &point in rest {
        let extend = live.client.extend_stroke(handle, point)?;
        live.send(&extend).await?;
    }
    let complete = live.client.complete_stroke(handle)?;
    live.send(&complete).await?;

    let seq = ack.data.get("seq").and_then(Value::as_f64).unwrap_or_default();
    eprintln!("stroke committed: stroke_id={} seq={seq} points={}", handle.id(), points.len());
    live.leave().await
}

async fn run_clear(cli: &CliContext, session: Uuid) -> Result<(), CliError> {
    let mut live = LiveSession::join(cli, session).await?;
    let clear = live.client.clear()?;
    live.send(&clear).await?;
    live.await_reply(&clear).await?;
    eprintln!("session cleared: {session}");
    live.leave().await
}

async fn run_chat(cli: &CliContext, session: Uuid, message: String) -> Result<(), CliError> {
    let mut live = LiveSession::join(cli, session).await?;
    let chat = live.client.chat(message)?;
    live.send(&chat).await?;
    live.await_reply(&chat).await?;
    live.leave().await
}

async fn run_watch(cli: &CliContext, args: WatchArgs) -> Result<(), CliError> {
    let mut live = LiveSession::join(cli, args.session).await?;
    let participant_id = live.client.participant_id().unwrap_or_default();
    let others: Vec<&str> =
        live.client.presence().others(participant_id).map(|p| p.display_name.as_str()).collect();
    eprintln!(
        "watching session {}: participant_id={participant_id} strokes={} others=[{}]",
        args.session,
        live.client.strokes().len(),
        others.join(", "),
    );

    let mut printed = 0_usize;
    while args.max_frames.is_none_or(|limit| printed < limit) {
        let frame = match next_frame(&mut live.stream).await {
            Ok(frame) => frame,
            Err(CliError::WsClosed) => {
                live.client.transport_lost();
                eprintln!("connection closed by server");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        live.client.handle_frame(&frame)?;
        if frame.prefix() == "cursor" && !args.cursors {
            continue;
        }
        println!("{}", serde_json::to_string(&frame)?);
        printed = printed.saturating_add(1);
    }

    eprintln!("watch complete: frames={printed} strokes={}", live.client.strokes().len());
    live.leave().await
}

// =============================================================================
// LIVE SESSION
// =============================================================================

/// A joined websocket connection with a sync client fed by every inbound frame.
struct LiveSession {
    stream: WsStream,
    client: SyncClient,
}

impl LiveSession {
    async fn join(cli: &CliContext, session_id: Uuid) -> Result<Self, CliError> {
        let url = ws_url(&cli.base_url)?;
        let (stream, _) = connect_async(url).await?;
        let mut live = Self { stream, client: SyncClient::new(session_id, cli.identity.clone()) };

        loop {
            let frame = recv_next(&mut live.stream, CONNECT_TIMEOUT).await?;
            live.client.handle_frame(&frame)?;
            if frame.syscall == syscall::SESSION_CONNECTED {
                break;
            }
        }

        let join = live.client.join_frame();
        live.send(&join).await?;
        live.await_reply(&join).await?;
        Ok(live)
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), CliError> {
        self.stream.send(Message::Binary(frames::encode_frame(frame).into())).await?;
        Ok(())
    }

    /// Apply inbound frames until the terminal reply to `request` arrives.
    async fn await_reply(&mut self, request: &Frame) -> Result<Frame, CliError> {
        loop {
            let frame = recv_next(&mut self.stream, REPLY_TIMEOUT).await?;
            let events = self.client.handle_frame(&frame)?;
            if frame.parent_id.as_deref() != Some(request.id.as_str()) || !frame.status.is_terminal() {
                continue;
            }
            if let Some(SyncEvent::Rejected { syscall, code, message }) =
                events.into_iter().find(|e| matches!(e, SyncEvent::Rejected { .. }))
            {
                return Err(CliError::ServerError { syscall, message: format!("{code}: {message}") });
            }
            if frame.status == Status::Error {
                return Err(CliError::ServerError { syscall: frame.syscall, message: "request failed".to_owned() });
            }
            return Ok(frame);
        }
    }

    async fn leave(mut self) -> Result<(), CliError> {
        if let Some(leave) = self.client.leave() {
            self.send(&leave).await?;
        }
        self.stream.close(None).await?;
        Ok(())
    }
}

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn recv_next(stream: &mut WsStream, timeout: Duration) -> Result<Frame, CliError> {
    tokio::time::timeout(timeout, next_frame(stream))
        .await
        .map_err(|_| CliError::Timeout)?
}

async fn next_frame(stream: &mut WsStream) -> Result<Frame, CliError> {
    loop {
        let Some(message) = stream.next().await else {
            return Err(CliError::WsClosed);
        };
        match message? {
            Message::Binary(bytes) => return frames::decode_frame(&bytes).map_err(CliError::from),
            Message::Close(_) => return Err(CliError::WsClosed),
            _ => {}
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_points(raw: &str) -> Result<Vec<Point>, CliError> {
    raw.split_whitespace()
        .map(|pair| {
            let invalid = || CliError::InvalidPoint(pair.to_owned());
            let (x, y) = pair.split_once(',').ok_or_else(invalid)?;
            let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
            let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
            let point = Point::new(x, y);
            if point.is_finite() { Ok(point) } else { Err(invalid()) }
        })
        .collect()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
