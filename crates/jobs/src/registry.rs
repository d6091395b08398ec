//! Handler registry: maps a job type's locator to a handler factory.
//!
//! Resolution happens once per worker session, not once per job.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::handler::JobHandler;
use crate::job_type::JobType;

/// Builds a handler for a job type, typically reading its `configuration`.
pub type HandlerFactory = Box<dyn Fn(&JobType) -> anyhow::Result<Arc<dyn JobHandler>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for locator `{locator}` (job type `{job_type}`)")]
    UnknownLocator { locator: String, job_type: String },

    #[error("invalid configuration for job type `{job_type}`: {source}")]
    InvalidConfiguration {
        job_type: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("locators", &self.locators())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a locator. A later registration replaces an earlier one.
    pub fn register_factory<F>(&mut self, locator: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobType) -> anyhow::Result<Arc<dyn JobHandler>> + Send + Sync + 'static,
    {
        self.factories.insert(locator.into(), Box::new(factory));
        self
    }

    /// Register a ready-made handler that ignores job type configuration.
    pub fn register<H: JobHandler>(&mut self, locator: impl Into<String>, handler: H) -> &mut Self {
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        self.register_factory(locator, move |_job_type| Ok(handler.clone()))
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }

    /// Registered locators, sorted.
    pub fn locators(&self) -> Vec<&str> {
        let mut locators: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        locators.sort_unstable();
        locators
    }

    pub fn resolve(&self, job_type: &JobType) -> Result<Arc<dyn JobHandler>, RegistryError> {
        let factory = self
            .factories
            .get(&job_type.locator)
            .ok_or_else(|| RegistryError::UnknownLocator {
                locator: job_type.locator.clone(),
                job_type: job_type.name.clone(),
            })?;

        factory(job_type).map_err(|source| RegistryError::InvalidConfiguration {
            job_type: job_type.name.clone(),
            source,
        })
    }
}
