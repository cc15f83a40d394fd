//! gridmesh terminal client.
//!
//! ## Usage
//!
//! ```bash
//! # Join a shared sheet and edit it line by line
//! gridmesh open team/budget.sheet --name Ada --token "$TOKEN"
//!
//! # Two in-process replicas talking through a loopback relay
//! gridmesh demo
//! ```
//!
//! Configuration is read from `~/.config/gridmesh/client.ron`; `GRIDMESH_*`
//! environment variables and command-line flags override it.

mod commands;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gridmesh_client::{
    ClientConfig, HttpPayloadSource, LoopbackRelay, PayloadSource, SessionEvent, SessionHandle,
    SessionOptions, SessionRegistry, SessionState, StaticPayloadSource, UpdateOrigin,
    WebSocketConnector, open_session,
};
use gridmesh_crdt::OpResult;
use gridmesh_overlay::OverlayLayer;
use gridmesh_types::{ClientId, Identity, Position, SheetData, Selection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Command, HELP};
use crate::render::{TextGeometry, TextPainter, render_sheet};

const VIEW_ROWS: usize = 12;
const VIEW_COLS: usize = 8;
const CELL_WIDTH: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "gridmesh")]
#[command(about = "Collaborative sheets in the terminal")]
struct Args {
    /// Config file (default: ~/.config/gridmesh/client.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collaboration server URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Base URL of the tabular export used by the first opener
    #[arg(long, global = true)]
    payload_url: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Open a shared resource and edit it interactively
    Open {
        /// Resource path; every client opening the same path shares a room
        path: String,

        /// Display name (anonymous when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Stable user id (defaults to the name)
        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        email: Option<String>,

        /// Access token offered to the server and the export endpoint
        #[arg(long, env = "GRIDMESH_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Run two replicas against an in-process relay and print what each sees
    Demo,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let result = match load_config(&args) {
        Ok(config) => match args.command {
            Cmd::Open { path, name, user_id, email, token } => {
                match identity_from_flags(name, user_id, email, token) {
                    Ok(identity) => run_open(config, &path, identity).await,
                    Err(e) => Err(e),
                }
            }
            Cmd::Demo => run_demo(config).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    if let Some(payload_url) = &args.payload_url {
        config.payload_url = Some(payload_url.clone());
    }
    config.validate()?;
    debug!("config: {:?}", config);
    Ok(config)
}

/// The signed-in user described by the `open` flags, `None` when anonymous.
///
/// A token belongs to a user, so it is only accepted together with a name.
fn identity_from_flags(
    name: Option<String>,
    user_id: Option<String>,
    email: Option<String>,
    token: Option<String>,
) -> Result<Option<Identity>> {
    let Some(name) = name else {
        if token.is_some() {
            bail!("an access token needs a signed-in user; pass --name as well");
        }
        return Ok(None);
    };
    let mut identity = Identity::new(user_id.unwrap_or_else(|| name.clone()), name);
    identity.email = email;
    identity.access_token = token;
    Ok(Some(identity))
}

// ============================================================================
// open
// ============================================================================

/// What the terminal is showing.
struct View {
    sheet_idx: usize,
    overlays: OverlayLayer<TextPainter>,
}

impl View {
    fn new() -> Self {
        Self {
            sheet_idx: 0,
            overlays: OverlayLayer::new(TextPainter::new(Self::geometry_for(0))),
        }
    }

    fn geometry_for(sheet_idx: usize) -> TextGeometry {
        TextGeometry { sheet_idx, cell_width: CELL_WIDTH, first_row: 0, first_col: 0 }
    }

    fn geometry(&self) -> TextGeometry {
        Self::geometry_for(self.sheet_idx)
    }

    fn print_sheet(&self, session: &SessionHandle) {
        match session.document().sheet_data(self.sheet_idx) {
            Some(sheet) => println!("{}", render_sheet(&sheet, VIEW_ROWS, VIEW_COLS, CELL_WIDTH)),
            None => println!("(no sheet {})", self.sheet_idx),
        }
    }

    fn redraw_cursors(&mut self, session: &SessionHandle) {
        let peers = session.peers();
        let refs: Vec<_> = peers.iter().map(|(id, record)| (*id, record)).collect();
        let geometry = self.geometry();
        self.overlays.painter_mut().set_geometry(geometry);
        let local = session.local_position();
        self.overlays
            .redraw(&refs, session.client_id(), local.as_ref(), &geometry);
    }

    fn print_peers(&self, session: &SessionHandle) {
        let peers = session.peers();
        if peers.is_empty() {
            println!("(no peers)");
            return;
        }
        for (id, record) in &peers {
            println!("{:>16}  {:<16} {}", id, record.user.name, record.user.color);
        }
        for line in self.overlays.painter().lines() {
            println!("  cursor: {line}");
        }
    }
}

async fn run_open(config: ClientConfig, path: &str, identity: Option<Identity>) -> Result<()> {
    let connector = Arc::new(WebSocketConnector::new(config.server_url()?));
    let payload: Arc<dyn PayloadSource> = match config.payload_url()? {
        Some(url) => Arc::new(HttpPayloadSource::new(url)?),
        None => Arc::new(StaticPayloadSource::empty()),
    };

    let registry = SessionRegistry::new(config, identity, connector, payload);
    let session = registry.open(path);
    let mut events = session.subscribe();
    let mut view = View::new();
    info!("opened {} as client {}", session.path(), session.client_id());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::DocumentUpdated { origin }) if origin != UpdateOrigin::Local => {
                    view.print_sheet(&session);
                }
                Ok(SessionEvent::DocumentUpdated { .. }) | Ok(SessionEvent::Synced) => {}
                Ok(SessionEvent::PresenceChanged) => view.redraw_cursors(&session),
                Ok(SessionEvent::StateChanged(state)) => {
                    eprintln!("-- {}", describe_state(&state));
                    if state == SessionState::Closed {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("missed {} session events, redrawing", missed);
                    view.print_sheet(&session);
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match commands::parse(&line, view.sheet_idx) {
                    Ok(Some(command)) => {
                        if !execute(&session, &mut view, command)? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    registry.close_all().await;
    Ok(())
}

fn describe_state(state: &SessionState) -> String {
    match state {
        SessionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        other => format!("{other:?}").to_lowercase(),
    }
}

/// Run one command. Returns `false` when the user asked to quit.
fn execute(session: &SessionHandle, view: &mut View, command: Command) -> Result<bool> {
    let sheet = view.sheet_idx;
    let outcome = match command {
        Command::Set { row, col, value } => Some(session.set_cell(sheet, row, col, &value)?),
        Command::InsertRow { index, values } => Some(session.insert_row(sheet, index, values)?),
        Command::DeleteRow { index, count } => Some(session.delete_row(sheet, index, count)?),
        Command::MoveRow { from, to } => Some(session.move_row(sheet, from, to)?),
        Command::InsertColumn { index, values } => Some(session.insert_column(sheet, index, values)?),
        Command::DeleteColumn { index, count } => Some(session.delete_column(sheet, index, count)?),
        Command::MoveColumn { from, to } => Some(session.move_column(sheet, from, to)?),
        Command::Sheet(idx) => {
            let count = session.document().sheet_count();
            if idx >= count {
                println!("no sheet {idx} ({count} sheets: {})", session.document().sheet_names().join(", "));
            } else {
                view.sheet_idx = idx;
                view.redraw_cursors(session);
                view.print_sheet(session);
            }
            None
        }
        Command::Select(position) => {
            session.set_selection(position)?;
            view.redraw_cursors(session);
            None
        }
        Command::Undo => {
            if !session.undo()? {
                println!("nothing to undo");
            }
            view.print_sheet(session);
            None
        }
        Command::Redo => {
            if !session.redo()? {
                println!("nothing to redo");
            }
            view.print_sheet(session);
            None
        }
        Command::Show => {
            view.print_sheet(session);
            None
        }
        Command::Peers => {
            view.print_peers(session);
            None
        }
        Command::Help => {
            println!("{HELP}");
            None
        }
        Command::Quit => return Ok(false),
    };

    match outcome {
        Some(OpResult::Applied) => view.print_sheet(session),
        Some(OpResult::Skipped { reason }) => println!("skipped: {reason:?}"),
        None => {}
    }
    Ok(true)
}

// ============================================================================
// demo
// ============================================================================

async fn run_demo(config: ClientConfig) -> Result<()> {
    let relay = LoopbackRelay::new();
    let payload = Arc::new(StaticPayloadSource::new(vec![SheetData::from_rows(
        "inventory",
        [vec!["sku", "qty", "bin"], vec!["A-100", "12", "3"], vec!["B-220", "4", "7"]],
    )]));

    let open = |client: u64, name: &str| {
        let options = SessionOptions::new("demo/inventory")
            .with_client_id(ClientId::from_raw(client))
            .with_identity(Identity::new(name.to_lowercase(), name))
            .with_config(config.clone());
        open_session(options, Arc::new(relay.clone()), payload.clone())
    };

    let alice = open(1, "Alice");
    alice.wait_synced().await?;
    wait_for(|| relay.sheets(&alice.room()).is_some_and(|s| !s.is_empty())).await?;

    let bob = open(2, "Bob");
    bob.wait_synced().await?;
    wait_for(|| !bob.sheets().is_empty()).await?;

    alice.set_cell(0, 1, 1, "15")?;
    bob.insert_row(0, 3, Some(vec!["C-310".into(), "9".into(), "1".into()]))?;
    alice.set_selection(Some(Position { sheet_idx: 0, selection: Selection::cell(1, 1) }))?;
    bob.set_selection(Some(Position { sheet_idx: 0, selection: Selection::cell(0, 0) }))?;

    wait_for(|| alice.sheets() == bob.sheets() && bob.peers().iter().any(|(_, r)| r.position.is_some()))
        .await?;

    for session in [&alice, &bob] {
        let mut view = View::new();
        view.redraw_cursors(session);
        let name = session.local_presence().map(|p| p.user.name).unwrap_or_default();
        println!("== {name} ==");
        view.print_sheet(session);
        for line in view.overlays.painter().lines() {
            println!("  cursor: {line}");
        }
    }

    alice.close().await;
    bob.close().await;
    Ok(())
}

async fn wait_for(mut check: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .context("replicas did not converge")
}
