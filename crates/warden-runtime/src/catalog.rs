//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use async_trait::async_trait;

/// Failure to enumerate the monitored services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// The catalog resolved to no services at all.
    #[error("service catalog is empty")]
    Empty,
    /// The backing source could not be read.
    #[error("service catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of the service names polled on every monitoring tick.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Return the services to poll, in polling order.
    async fn services(&self) -> Result<Vec<String>, CatalogError>;
}

/// Fixed service list, typically taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    services: Vec<String>,
}

impl StaticCatalog {
    /// Build a catalog from the provided names.
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ServiceCatalog for StaticCatalog {
    async fn services(&self) -> Result<Vec<String>, CatalogError> {
        if self.services.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(self.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_catalog_preserves_order_and_rejects_empty() {
        let catalog = StaticCatalog::new(["b", "a"]);
        assert_eq!(catalog.services().await.unwrap(), vec!["b", "a"]);
        let empty = StaticCatalog::new(Vec::<String>::new());
        assert_eq!(empty.services().await, Err(CatalogError::Empty));
    }
}
