use anyhow::{Context, Result};
use facelog_core::{FaceStore, SystemClock, Tracker};
use facelog_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod prompt;
mod session;

use config::Config;
use session::Session;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tracing::info!(
        device = %config.camera_device,
        db = %config.db_path.display(),
        threshold = config.similarity_threshold,
        debounce_secs = config.debounce_secs,
        "facelogd starting"
    );

    let mut store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let gallery = store.load_gallery().context("failed to load face gallery")?;
    tracing::info!(
        people = gallery.person_count(),
        embeddings = gallery.len(),
        "gallery loaded"
    );

    let tracker = Tracker::new(gallery, config.tracker_config(), SystemClock::new());
    let mut session = Session::new(tracker);
    let mut capture = engine::spawn_capture(&config).context("failed to start capture")?;
    let (prompt_tx, mut prompt_rx) = prompt::spawn_prompt();

    tracing::info!("facelogd ready");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            observation = capture.observations.recv() => {
                let Some(observation) = observation else {
                    tracing::info!("camera stream ended");
                    break;
                };
                session.on_observation(observation, &mut store, &prompt_tx);
            }
            reply = prompt_rx.recv(), if session.prompt_open() => {
                match reply {
                    Some(reply) => {
                        session.on_reply(reply, &mut store);
                    }
                    None => session.on_prompt_closed(),
                }
            }
            result = &mut shutdown => {
                if let Err(err) = result {
                    tracing::error!(error = %err, "failed to listen for ctrl-c");
                }
                tracing::info!("facelogd shutting down");
                break;
            }
        }
    }

    capture.shutdown();
    if let Some(ticket) = session.pending_ticket() {
        tracing::info!(ticket, "unanswered registration discarded");
    }
    tracing::info!(
        events = store.event_count().unwrap_or(0),
        gallery = session.tracker().gallery().len(),
        "facelogd stopped"
    );
    Ok(())
}
