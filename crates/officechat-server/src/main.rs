use anyhow::Result;
use officechat_kv::{ExpiryReaper, HashKv, KvBackend, MemoryBackend, ReaperConfig, SqliteBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use officechat_server::config::{Settings, StoreBackend, StoreConfig};
use officechat_server::handlers::build_router;
use officechat_server::services::conversation::{ContentRegistry, UserContextCache};
use officechat_server::services::{CompletionService, ConversationManager, ConversationStore, LlmService};
use officechat_server::state::AppState;
use officechat_server::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logger()?;

    info!("Starting officechat server...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let backend = open_backend(&settings.store).await?;
    info!("Store backend: {}", backend.name());

    let kv = Arc::new(HashKv::new(backend));
    let store = Arc::new(ConversationStore::new(kv));

    let shutdown = CancellationToken::new();
    let reaper = Arc::new(ExpiryReaper::new(
        store.clone(),
        ReaperConfig::new(
            settings.store.enable_expire_job,
            settings.store.expire_job_interval_secs,
        ),
    ));
    let reaper_handle = reaper.spawn(shutdown.child_token());

    let llm = Arc::new(LlmService::new(settings.llm.clone())?);
    info!("LLM provider: {} ({})", settings.llm.base_url, settings.llm.text_model);

    let conversation_manager = Arc::new(ConversationManager::new(
        store,
        ContentRegistry::with_defaults(settings.chat.text_processor_ext_transform.clone()),
        llm.clone(),
        &settings.llm,
        settings.chat.clone(),
    ));
    let user_cache = UserContextCache::from_config(&settings.user_chat);
    let cleanup_handle = user_cache.spawn_cleanup(
        Duration::from_secs(settings.user_chat.cleanup_interval_secs.max(1)),
        shutdown.child_token(),
    );
    let completion_service = Arc::new(CompletionService::new(
        llm,
        user_cache,
        settings.user_chat.support_context,
    ));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState {
        conversation_manager,
        completion_service,
        settings: Arc::new(settings),
        shutdown: shutdown.clone(),
    };
    let app = build_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    reaper_handle.await?;
    cleanup_handle.await?;
    info!("Server stopped");
    Ok(())
}

async fn open_backend(cfg: &StoreConfig) -> Result<Arc<dyn KvBackend>> {
    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryBackend::new())),
        StoreBackend::Sqlite => {
            if let Some(path) = cfg.sqlite_url.strip_prefix("sqlite://") {
                if let Some(dir) = std::path::Path::new(path).parent() {
                    if !dir.as_os_str().is_empty() {
                        std::fs::create_dir_all(dir)?;
                    }
                }
            }
            Ok(Arc::new(SqliteBackend::connect(&cfg.sqlite_url).await?))
        }
    }
}
