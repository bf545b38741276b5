pub mod batch;
pub mod cache;
pub mod chat;
pub mod config;
pub mod fingerprint;
pub mod metrics;
pub mod provider;
pub mod store;
pub mod testing;

pub use batch::{
    BatchOrchestrator, BatchProcessor, BatchResult, BatchingConfig, ErrorKind,
    OrchestratorStatus, ProviderBatchProcessor, RecoveryConfig, ResultError, ResultReceiver,
};
pub use cache::{ResultCache, StoreBackedCache};
pub use chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, DatabaseConfig, ProviderConfig, SanitizedConfig, ServerConfig, ServingConfig,
    ServingMode,
};
pub use fingerprint::{fingerprint, Fingerprint, FingerprintError};
pub use provider::{BatchProvider, BatchStatus, OpenAiProvider, ProviderBatch, ProviderError};
pub use store::{BatchStore, SqliteStore, StoreError};
