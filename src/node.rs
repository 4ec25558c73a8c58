use crate::config::Config;
use crate::error::ChainError;
use crate::persistence::{ChainStore, Database};
use crate::resolver::BlockResolver;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Ready,
    Degraded,
}

pub struct Node {
    pub config: Config,
    pub store: Arc<dyn ChainStore>,
    pub resolver: BlockResolver,
    pub state: Arc<RwLock<NodeState>>,
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed (tests, embedding binaries).
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Opens the SQLite store at `path`, creating its parent directory.
pub fn open_database(path: &str) -> Result<Database, ChainError> {
    let db_path = std::path::Path::new(path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Database::open(path)
}

impl Node {
    pub fn init(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing(&config.logging.level);
        info!(database = %config.database.path, "Starting Blockscope node");

        let db = open_database(&config.database.path).map_err(|e| {
            error!("Failed to open DB at {}: {}", config.database.path, e);
            e
        })?;

        Ok(Self::with_store(config, Arc::new(db)))
    }

    pub fn with_store(config: Config, store: Arc<dyn ChainStore>) -> Self {
        Self {
            config,
            resolver: BlockResolver::new(store.clone()),
            store,
            state: Arc::new(RwLock::new(NodeState::Booting)),
        }
    }

    /// Checks the store has a head and marks the node `Ready`, or `Degraded`
    /// when the chain is empty or unreadable.
    pub async fn check_store(&self) -> NodeState {
        let store = self.store.clone();
        let head = tokio::task::spawn_blocking(move || store.head_header()).await;

        let next = match head {
            Ok(Ok(head)) => {
                info!(sequence = head.sequence, hash = %head.hash_hex(), "Chain head loaded");
                NodeState::Ready
            }
            Ok(Err(ChainError::EmptyChain)) => {
                warn!("Chain store is empty; lookups will fail until blocks are imported");
                NodeState::Degraded
            }
            Ok(Err(e)) => {
                error!("Failed to read chain head: {}", e);
                NodeState::Degraded
            }
            Err(e) => {
                error!("Chain head check panicked: {}", e);
                NodeState::Degraded
            }
        };

        *self.state.write().await = next.clone();
        next
    }

    #[cfg(feature = "api")]
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error>> {
        self.check_store().await;

        let api = &self.config.api;
        let addr: SocketAddr = format!("{}:{}", api.host, api.port)
            .parse()
            .map_err(|e| format!("Invalid API address {}:{}: {}", api.host, api.port, e))?;

        let api_node = crate::api::Node::new_shared(self.resolver.clone(), api, self.state.clone());
        crate::api::run_api_server(Arc::new(api_node), addr).await
    }

    #[cfg(not(feature = "api"))]
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error>> {
        Err("API feature not enabled in this build".into())
    }
}
