use thiserror::Error;

use crate::config::ConfigError;
use crate::providers::ProviderError;
use crate::storage::store::StoreError;

/// Fatal conditions for a generation run. Everything recoverable (provider
/// failures, novelty rejections, corrupt history records) is handled inside
/// the orchestrator and never surfaces here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("history ledger unavailable: {0}")]
    LedgerUnavailable(#[source] StoreError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to set up provider: {0}")]
    ProviderSetup(#[from] ProviderError),
}
