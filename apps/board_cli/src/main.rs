use anyhow::{Context, Result};
use board_sync::{load_settings, BoardSync, BoardView, SyncEvent};
use clap::Parser;
use shared::domain::{BoardId, UserId};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Opens a board and prints its columns.
#[derive(Parser, Debug)]
struct Args {
    board_id: i64,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
    /// Keep running and reprint the board after each remote change.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(user_id) = args.user_id {
        settings.user_id = Some(UserId(user_id));
    }

    let board_id = BoardId(args.board_id);
    let sync = BoardSync::connect(&settings)?;
    let mut events = BroadcastStream::new(sync.subscribe_events());
    let view = sync
        .open_board(board_id)
        .await
        .with_context(|| format!("failed to open board {board_id}"))?;
    print_board(&view);

    if args.watch {
        watch(&sync, board_id, &mut events).await;
    }
    sync.close_board(board_id).await;
    Ok(())
}

async fn watch(sync: &BoardSync, board_id: BoardId, events: &mut BroadcastStream<SyncEvent>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            event = events.next() => match event {
                Some(Ok(SyncEvent::RemoteChange { board_id: changed, kind })) if changed == board_id => {
                    println!("-- {kind} --");
                    sync.wait_idle(board_id).await;
                    if let Some(view) = sync.view(board_id).await {
                        print_board(&view);
                    }
                }
                Some(Ok(SyncEvent::PushDisconnected { .. })) => {
                    warn!(board_id = board_id.0, "board_cli: push channel closed; showing last known state");
                }
                Some(Ok(SyncEvent::Notice(notice))) => println!("{}", notice.headline()),
                Some(Ok(_)) => {}
                Some(Err(err)) => warn!("board_cli: missed events: {err}"),
                None => return,
            }
        }
    }
}

fn print_board(view: &BoardView) {
    println!("{} (board {})", view.meta.title, view.board_id);
    for list in view.columns() {
        println!("[{}] {}", list.list_id, list.title);
        for card in &list.cards {
            let mark = if card.is_complete { "x" } else { " " };
            println!("  [{mark}] #{} {}", card.card_id, card.title);
        }
    }
}
