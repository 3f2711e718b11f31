//! Headless slither client.
//!
//! Logs in, steers in a slow circle, logs the render operations it would
//! draw and dumps the leaderboard periodically.
//!
//! Run with: `cargo run -p slither-client -- --server 127.0.0.1 --username ann`

use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};

use slither_client::{
    ClientError, ClientSettings, GameClient, RenderSink, SteadyClock, StickInput, build_session,
};
use slither_config::{CliArgs, Config, TransportKind, default_config_dir};
use slither_net::ConnectionState;
use slither_world::Operation;

/// Sleep between frames.
const FRAME_SLEEP: Duration = Duration::from_millis(16);

/// Radians per second the steering stick turns.
const TURN_RATE: f64 = 0.5;

/// Render sink that writes everything to the log.
#[derive(Default)]
struct LogSink {
    operations: u64,
}

impl RenderSink for LogSink {
    fn apply(&mut self, ops: &[Operation]) {
        self.operations += ops.len() as u64;
        let creates = ops.iter().filter(|op| op.is_create()).count();
        let updates = ops.iter().filter(|op| op.is_update()).count();
        debug!(
            total = ops.len(),
            creates,
            updates,
            other = ops.len() - creates - updates,
            "Applied operations"
        );
        for op in ops {
            match op {
                Operation::CreatePlayer { id, appearance } => {
                    info!(player = %id, name = %appearance.name, "Player appeared");
                }
                Operation::RemovePlayer { id } => info!(player = %id, "Player left"),
                Operation::StartEffectTimer { effect, duration } => {
                    info!(effect = effect.as_str(), duration = *duration, "Effect started");
                }
                _ => {}
            }
        }
    }

    fn status(&mut self, text: &str) {
        info!("{text}");
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        info!(?state, "Connection state changed");
    }
}

fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    slither_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(2);
    }

    let Some(username) = config.resolve_username(&args) else {
        error!("No username given; pass --username");
        std::process::exit(2);
    };
    let host = config.preferred_server().to_string();
    let port = config.network.server_port;

    // The runtime must outlive the session built on it.
    let runtime = match config.network.transport {
        TransportKind::Evented => match tokio::runtime::Runtime::new() {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                error!("Failed to start tokio runtime: {e}");
                std::process::exit(1);
            }
        },
        TransportKind::Blocking => None,
    };
    let session = match build_session(
        &config.network,
        runtime.as_ref().map(|r| r.handle().clone()),
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    info!(
        host = %host,
        port,
        username = %username,
        transport = session.transport_name(),
        "Slither client starting"
    );

    let mut client = GameClient::new(
        session,
        ClientSettings::from_config(&config),
        SteadyClock::new(),
        StickInput::new(),
    );
    match client.login(&host, port, &username) {
        Ok(()) => {}
        // Reported again as a disconnect; reconnection may still follow.
        Err(ClientError::Session(e)) => warn!("Connect failed: {e}"),
        Err(e) => {
            error!("Login failed: {e}");
            std::process::exit(1);
        }
    }

    config.remember_login(&host, &username);
    if let Err(e) = config.save(&config_dir) {
        error!("Failed to save config: {e}");
    }

    let leaderboard_interval = config.debug.leaderboard_interval_s;
    let mut last_leaderboard = 0.0;
    let mut sink = LogSink::default();

    loop {
        let now = client.now();
        if client.is_joined() {
            client.movement_mut().push(now * TURN_RATE, 1.0);
        } else {
            client.movement_mut().release();
        }

        client.frame(&mut sink);
        if client.is_finished() {
            break;
        }

        if leaderboard_interval > 0.0 && now - last_leaderboard >= leaderboard_interval {
            last_leaderboard = now;
            for row in client.leaderboard() {
                info!("{}", row.text);
            }
            let world = client.world();
            let head = world
                .local_player()
                .and_then(|id| world.players.get(id))
                .and_then(|player| player.head_position());
            info!(
                players = world.players.len(),
                food = world.visible_food().count(),
                head = ?head,
                "World summary"
            );
        }

        std::thread::sleep(FRAME_SLEEP);
    }

    let stats = client.session().stats();
    info!(
        operations = sink.operations,
        mean_frame_bytes = stats.mean_frame_in().unwrap_or_default(),
        %stats,
        "Slither client stopped"
    );
}
