//! Process-scoped relay client handle.
//!
//! One relay client serves every session. [`ClientSlot`] owns it and makes
//! initialization idempotent: the first caller connects, concurrent callers
//! wait for that attempt, later callers get the existing client.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{
    config::RelayConfig,
    transport::{RelayClient, RelayConnector, RelayError},
};

#[derive(Default)]
pub struct ClientSlot {
    client: OnceCell<Arc<dyn RelayClient>>,
}

impl ClientSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client, connecting on first use.
    ///
    /// A failed connect leaves the slot empty so the next call retries.
    pub async fn get_or_init(
        &self,
        connector: &dyn RelayConnector,
        config: &RelayConfig,
    ) -> Result<Arc<dyn RelayClient>, RelayError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to relay at {}", config.url);
                let client = connector.connect(config).await?;
                info!("Relay client started");
                Ok(client)
            })
            .await
            .cloned()
    }

    /// The client, if already initialized
    pub fn get(&self) -> Option<Arc<dyn RelayClient>> {
        self.client.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mem::{MemoryConnector, MemoryRelay};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_init_connects_once() {
        let connector = MemoryConnector::new(Arc::new(MemoryRelay::new()));
        let slot = ClientSlot::new();
        let config = RelayConfig::default();

        let (a, b, c) = tokio::join!(
            slot.get_or_init(&connector, &config),
            slot.get_or_init(&connector, &config),
            slot.get_or_init(&connector, &config),
        );

        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(connector.connect_count(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));

        slot.get_or_init(&connector, &config).await.unwrap();
        assert_eq!(connector.connect_count(), 1);
        assert!(slot.is_initialized());
    }

    struct FlakyConnector {
        attempts: AtomicUsize,
        relay: Arc<MemoryRelay>,
    }

    #[async_trait]
    impl RelayConnector for FlakyConnector {
        async fn connect(
            &self,
            _config: &RelayConfig,
        ) -> Result<Arc<dyn RelayClient>, RelayError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RelayError::ConnectionFailed("relay unreachable".to_string()))
            } else {
                Ok(self.relay.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_failed_init_can_retry() {
        let connector = FlakyConnector {
            attempts: AtomicUsize::new(0),
            relay: Arc::new(MemoryRelay::new()),
        };
        let slot = ClientSlot::new();
        let config = RelayConfig::default();

        assert!(slot.get_or_init(&connector, &config).await.is_err());
        assert!(slot.get().is_none());

        assert!(slot.get_or_init(&connector, &config).await.is_ok());
        assert!(slot.get().is_some());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }
}
