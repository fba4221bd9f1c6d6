use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weave_cli::{
    command::{Command, HELP},
    config::Config,
    render::Renderer,
};
use weave_client::{GenerationBackend, HttpBackend};
use weave_persist::{InMemoryStore, MessageStore};
use weave_session::{ChatOrchestrator, OrchestratorError, ViewState};
use weave_types::RequestParams;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    init_logging(&config);

    tracing::info!("Starting weave chat client");
    tracing::info!("Backend endpoint: {}", config.backend.endpoint);

    let store = build_store(&config).await?;
    let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(config.backend_config())?);
    let orchestrator = ChatOrchestrator::new(backend, store, config.session.clone().into());
    let params = config.backend.request_params();

    let renderer = tokio::spawn(render_view(orchestrator.subscribe()));
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    finish(&orchestrator).await;
                    break;
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if !run_command(&orchestrator, &params, command).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, saving partial reply");
                orchestrator.page_unload();
                break;
            }
        }
    }

    drop(orchestrator);
    renderer.abort();
    Ok(())
}

/// Execute one command. Returns false when the client should exit.
async fn run_command(orchestrator: &ChatOrchestrator, params: &RequestParams, command: Command) -> bool {
    match command {
        Command::Send(text) => send(orchestrator, &text, params.clone()).await,
        Command::SendMedia { media, text } => send(orchestrator, &text, params.clone().with_media(media)).await,
        Command::Stop => orchestrator.stop().await,
        Command::Open(conversation_id) => orchestrator.open_conversation(&conversation_id).await,
        Command::New => {
            orchestrator.new_conversation().await;
            println!("-- new conversation --");
        }
        Command::Help => println!("{}", HELP),
        Command::Invalid(message) => eprintln!("{}", message),
        Command::Quit => {
            finish(orchestrator).await;
            return false;
        }
    }
    true
}

async fn send(orchestrator: &ChatOrchestrator, text: &str, params: RequestParams) {
    match orchestrator.send(text, params).await {
        Ok(_) => {}
        Err(OrchestratorError::Concurrent(e)) => {
            eprintln!("A reply is still streaming, /stop it first");
            tracing::debug!(error = %e, "Rejected concurrent send");
        }
        // The view carries the notice for backend failures
        Err(OrchestratorError::Backend(e)) => tracing::warn!(error = %e, "Failed to open stream"),
        Err(e) => eprintln!("{}", e),
    }
}

/// Persist any partial reply before exiting
async fn finish(orchestrator: &ChatOrchestrator) {
    if let Some(flush) = orchestrator.unmount() {
        if let Err(e) = flush.await {
            tracing::warn!(error = %e, "Flush task failed");
        }
    }
}

async fn render_view(mut view: watch::Receiver<ViewState>) {
    let mut renderer = Renderer::new(std::io::stdout());
    while view.changed().await.is_ok() {
        let snapshot = view.borrow_and_update().clone();
        if let Err(e) = renderer.render(&snapshot) {
            tracing::warn!(error = %e, "Failed to write to terminal");
            break;
        }
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn MessageStore>> {
    #[cfg(feature = "mongodb")]
    if let Some(uri) = &config.mongodb_uri {
        tracing::info!("Connecting to MongoDB");
        let store = weave_persist::MongoMessageStore::connect(uri, &config.mongodb.database).await?;
        tracing::info!("MongoDB connected");
        return Ok(Arc::new(store));
    }

    if config.mongodb_uri.is_some() && !cfg!(feature = "mongodb") {
        tracing::warn!("MONGODB_URI is set but weave was built without the mongodb feature");
    }
    tracing::info!("Using in-memory message store");
    Ok(Arc::new(InMemoryStore::new()))
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout belongs to the conversation
    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
