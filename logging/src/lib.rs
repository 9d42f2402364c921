//! A small, opinionated `tracing` setup shared by `meshd` and by anything
//! else that embeds the engine: one global subscriber, one `EnvFilter`
//! parsed from a directive string, plain or JSON output.
use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Crates whose default verbosity drowns out everything else; silenced
/// unless the caller's directives explicitly restate them.
const IRRELEVANT_CRATES: &str = "mio=warn,want=warn,tower=warn";

/// Registers a global subscriber. `directives` follows `EnvFilter` syntax
/// (e.g. `"mesh_engine=debug,info"`); an empty string falls back to `info`.
/// `json` switches the stdout layer from the human-readable formatter to
/// newline-delimited JSON, for log shipping.
pub fn setup_global_subscriber(directives: &str, json: bool) -> Result<()> {
    let filter = parse_filter(directives).context("failed to parse log directives")?;

    let fmt_layer = if json {
        fmt::layer().json().flatten_event(true).boxed()
    } else {
        fmt::layer().boxed()
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install global tracing subscriber")
}

fn parse_filter(directives: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    if directives.is_empty() {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},info"))
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
    }
}

/// Installs a subscriber that writes to the test harness's captured output,
/// for use from `#[tokio::test]`/`#[test]` functions that want visible logs
/// on failure.
pub fn test(directives: &str) -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
