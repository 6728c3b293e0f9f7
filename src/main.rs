use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use audit_coverage::{
    config::{Config, LogFormat},
    session::{persistence, SessionTracker},
};

fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_dir = %config.session.dir.display(),
        "Audit coverage snapshot starting..."
    );

    // The tracker replaces an unreadable session file on its first save.
    if let Some(session_id) = &config.session.id {
        persistence::read_session(&config.session.dir, session_id)?;
    }

    let tracker = SessionTracker::from_config(&config.session);
    tracker.initialize_coverage(&config.inputs.graphs_dir, &config.inputs.manifest_dir);

    let stats = tracker.get_coverage_stats();
    info!(
        session_id = %tracker.session_id(),
        nodes_visited = stats.nodes.visited,
        nodes_total = stats.nodes.total,
        cards_visited = stats.cards.visited,
        cards_total = stats.cards.total,
        "Coverage snapshot ready"
    );

    println!("{}", serde_json::to_string_pretty(stats.as_ref())?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
