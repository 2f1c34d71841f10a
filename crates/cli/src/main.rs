mod repl;
mod settings;

use openbase_api::{CoderClient, InspectClient};
use openbase_chat::ChatOrchestrator;

use crate::settings::SettingsStore;

/// Terminal entry point.
///
/// Bootstraps in the same order every run: tracing first so settings
/// loading can log, then settings, then the HTTP clients sharing one
/// connection pool, then the orchestrator and the REPL.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(server_url = %settings.server_url, "connecting to openbase backend");

    let http = reqwest::Client::new();
    let coder = CoderClient::new(http.clone(), settings.coder_base_url());
    let inspect = InspectClient::new(http, settings.openbase_base_url());
    let orchestrator = ChatOrchestrator::new(coder);

    if let Err(error) = repl::run(orchestrator, inspect, settings_store).await {
        tracing::error!(error = %error, "terminal session failed");
        std::process::exit(1);
    }
}
