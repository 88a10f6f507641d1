//! Player Relay Server
//!
//! Serves an in-memory demo player over TCP. Configure with `RELAY_CONFIG`
//! (JSON file) and the `RELAY_*` overrides; log level with `RUST_LOG`.

use anyhow::Context;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use player_relay::model::item::meta;
use player_relay::model::{Item, ItemRef, ListContents, ListEntry, PlaybackState, PlayerInfo};
use player_relay::upstream::memory::MemoryPlayer;
use player_relay::{MemoryController, RelayConfig, RelayServer, PROTOCOL_VERSION, VERSION};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Player Relay v{} (protocol {})", VERSION, PROTOCOL_VERSION);

    let config = RelayConfig::from_env().context("Failed to load configuration")?;

    // All relay state lives on this one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let controller = Rc::new(demo_controller());
    let server = RelayServer::new(config, controller)?;

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            handle.shutdown();
        }
    });

    server.serve_tcp().await?;
    info!("Relay stopped");
    Ok(())
}

/// One player with a short playlist and a small library.
fn demo_controller() -> MemoryController {
    let info = PlayerInfo::new(
        "demo",
        PlayerInfo::FLAG_PLAYLIST | PlayerInfo::FLAG_QUEUE | PlayerInfo::FLAG_LIBRARY | PlayerInfo::FLAG_SEEK,
        5,
    );
    let mut player = MemoryPlayer::new(info);

    let tracks = [
        ("t1", "Opening", "The Examples", "212"),
        ("t2", "Interlude", "The Examples", "95"),
        ("t3", "Finale", "The Examples", "301"),
    ];
    for (id, title, artist, length) in tracks {
        let item = Item::new(id)
            .with_meta(meta::TITLE, title)
            .with_meta(meta::ARTIST, artist)
            .with_meta(meta::ALBUM, "Demo Album")
            .with_meta(meta::LENGTH, length);
        player.items.insert(id.to_string(), item);
        player.status.playlist.push(ItemRef::new(id, title));
    }

    player.status.active_item = Some("t1".to_string());
    player.status.basic.state = PlaybackState::Stop;
    player.status.basic.volume = 50;
    player.status.basic.position = 0;

    player.library.push(ListEntry::new("album:demo", "Demo Album", 0));
    player.lists.insert(
        "album:demo".to_string(),
        ListContents {
            nested: Vec::new(),
            items: player.status.playlist.clone(),
        },
    );

    let controller = MemoryController::new();
    controller.add_player(player);
    controller
}
