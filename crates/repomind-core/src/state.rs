// SPDX-License-Identifier: Apache-2.0

//! Application-owned provider instances.
//!
//! Each provider lives in a [`ProviderCell`]: created on first use, replaceable
//! for tests, and resettable when configuration changes. Providers are never
//! mutated after construction.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use octocrab::Octocrab;
use tracing::{debug, info};

use crate::ai::{AiProvider, create_provider};
use crate::cache::{CacheProvider, create_cache_provider};
use crate::config::AppConfig;
use crate::github::create_client;

/// A lazily initialised, resettable shared instance.
pub struct ProviderCell<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for ProviderCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ProviderCell<T> {
    /// Empty cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Current instance, if initialised.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the instance, creating it with `init` on first use.
    ///
    /// Concurrent first callers construct at most once; a failed `init`
    /// leaves the cell empty.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<Arc<T>, E>) -> Result<Arc<T>, E> {
        if let Some(existing) = self.get() {
            return Ok(existing);
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = init()?;
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    /// Replaces the instance.
    pub fn set(&self, value: Arc<T>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Drops the instance so the next access re-creates it. Returns the old one.
    pub fn reset(&self) -> Option<Arc<T>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether an instance is present.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Configuration plus the shared cache, AI and GitHub instances.
pub struct AppState {
    config: AppConfig,
    cache: ProviderCell<dyn CacheProvider>,
    ai: ProviderCell<dyn AiProvider>,
    github: ProviderCell<Octocrab>,
}

impl AppState {
    /// State with empty cells.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cache: ProviderCell::new(),
            ai: ProviderCell::new(),
            github: ProviderCell::new(),
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cache provider, created from configuration on first use.
    ///
    /// # Errors
    ///
    /// Fails when the selected backend is misconfigured.
    pub fn cache(&self) -> Result<Arc<dyn CacheProvider>> {
        self.cache.get_or_try_init(|| {
            let provider = create_cache_provider(&self.config.cache)?;
            info!(provider = provider.name(), "Initialised cache provider");
            Ok(provider)
        })
    }

    /// AI provider, created from configuration on first use.
    ///
    /// # Errors
    ///
    /// Fails when the selected backend's credentials are missing.
    pub fn ai(&self) -> Result<Arc<dyn AiProvider>> {
        self.ai.get_or_try_init(|| create_provider(&self.config.ai))
    }

    /// GitHub client, created from configuration on first use.
    ///
    /// # Errors
    ///
    /// Fails when the client cannot be built.
    pub fn github(&self) -> Result<Arc<Octocrab>> {
        self.github
            .get_or_try_init(|| create_client(&self.config.github).map(Arc::new))
    }

    /// Injects a cache provider.
    pub fn set_cache(&self, cache: Arc<dyn CacheProvider>) {
        self.cache.set(cache);
    }

    /// Injects an AI provider.
    pub fn set_ai(&self, ai: Arc<dyn AiProvider>) {
        self.ai.set(ai);
    }

    /// Injects a GitHub client.
    pub fn set_github(&self, github: Arc<Octocrab>) {
        self.github.set(github);
    }

    /// Drops the cache provider.
    pub fn reset_cache(&self) {
        self.cache.reset();
    }

    /// Drops the AI provider.
    pub fn reset_ai(&self) {
        self.ai.reset();
    }

    /// Drops every provider.
    pub fn reset_all(&self) {
        self.cache.reset();
        self.ai.reset();
        self.github.reset();
        debug!("Reset all providers");
    }
}
