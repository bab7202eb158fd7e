//! Provider chain: priority-ordered failover across configured providers.
//!
//! Transient failures are retried against the same provider with backoff;
//! anything else moves on to the next provider, and a provider is never
//! revisited within one call. Output the caller cannot use counts as that
//! provider's failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::http::HttpProvider;
use super::retry::RetryPolicy;
use super::{GenerationRequest, ProviderDescriptor, ProviderError, TextProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("all providers failed: {}", summarize(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },
}

fn summarize(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.provider, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A value the chain produced, tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub provider: String,
    pub value: T,
}

#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn TextProvider>>,
    retry: RetryPolicy,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, retry: RetryPolicy) -> Self {
        Self { providers, retry }
    }

    /// Builds HTTP providers from descriptors, in the given order.
    pub fn from_descriptors(
        descriptors: &[ProviderDescriptor],
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let mut providers: Vec<Arc<dyn TextProvider>> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            info!(
                "Provider configured: {} (model: {})",
                descriptor.name, descriptor.model
            );
            providers.push(Arc::new(HttpProvider::new(descriptor.clone(), timeout)?));
        }
        Ok(Self::new(providers, retry))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Runs `request` down the chain until a provider returns text that
    /// `accept` turns into a value. `accept` returning `Err` marks that
    /// provider's output unusable and fails over.
    pub async fn generate_with<T, F>(
        &self,
        request: &GenerationRequest,
        mut accept: F,
    ) -> Result<Generated<T>, ChainError>
    where
        F: FnMut(&str, &str) -> Result<T, String>,
    {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let name = provider.name();
            match self.call_with_retry(provider.as_ref(), request).await {
                Ok(text) => match accept(name, &text) {
                    Ok(value) => {
                        return Ok(Generated {
                            provider: name.to_string(),
                            value,
                        })
                    }
                    Err(why) => {
                        warn!("Provider {name} returned unusable output: {why}");
                        failures.push(ProviderFailure {
                            provider: name.to_string(),
                            error: ProviderError::Unusable(why),
                        });
                    }
                },
                Err(error) => {
                    warn!("Provider {name} failed: {error}; moving to next provider");
                    failures.push(ProviderFailure {
                        provider: name.to_string(),
                        error,
                    });
                }
            }
        }

        Err(ChainError::AllProvidersFailed { failures })
    }

    async fn call_with_retry(
        &self,
        provider: &dyn TextProvider,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        let mut retry = 0;
        loop {
            match provider.generate(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    warn!(
                        "Provider {} failed ({e}), retry {}/{} after {}ms",
                        provider.name(),
                        retry,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
