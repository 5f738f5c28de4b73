//! Client assembly

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::embeddings::EmbeddingService;
use crate::error::Result;
use crate::generation::GenerationService;
use crate::transport::{HttpFacade, RequestFacade};

/// Entry point bundling one transport with the services that use it.
///
/// Each service owns its own limiter; they only share the transport.
#[derive(Clone, Debug)]
pub struct Client {
    config: ClientConfig,
    generation: GenerationService,
    embeddings: Arc<EmbeddingService>,
}

impl Client {
    /// Build a client that talks HTTP to `config.endpoint`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let facade = HttpFacade::new(config.clone())?;
        Ok(Self::with_facade(Arc::new(facade), config))
    }

    /// Build a client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Build a client over an arbitrary transport
    pub fn with_facade(facade: Arc<dyn RequestFacade>, config: ClientConfig) -> Self {
        tracing::debug!(endpoint = %config.endpoint, "Creating client");
        Self {
            generation: GenerationService::new(Arc::clone(&facade), &config),
            embeddings: Arc::new(EmbeddingService::new(facade, &config)),
            config,
        }
    }

    /// Text generation
    #[must_use]
    pub fn generation(&self) -> &GenerationService {
        &self.generation
    }

    /// Text embeddings
    #[must_use]
    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
