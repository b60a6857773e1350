//! Storage for the currently active trigger configuration. [`ConfigurationStore`] provides
//! concurrent access for readers (rule evaluation) and writers (configuration sync), and lets
//! presentation pipelines wait until configuration has been loaded at least once.
use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::Configuration;

/// `ConfigurationStore` is a `Sync` holder of the active [`Configuration`].
///
/// Readers receive a *snapshot* that is not affected by further writes.
pub struct ConfigurationStore {
    configuration: watch::Sender<Option<Arc<Configuration>>>,
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        ConfigurationStore {
            configuration: watch::Sender::new(None),
        }
    }
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get currently-active configuration. Returns `None` if configuration hasn't been stored
    /// yet.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.borrow().clone()
    }

    /// Atomically replace the active configuration.
    pub fn set_configuration(&self, configuration: Arc<Configuration>) {
        self.configuration.send_replace(Some(configuration));
    }

    /// Drop the active configuration. Readiness waits started afterwards block until the next
    /// [`ConfigurationStore::set_configuration`].
    pub fn clear(&self) {
        self.configuration.send_replace(None);
    }

    /// Wait until configuration is available, for at most `timeout`.
    ///
    /// Returns `None` if the timeout expired first.
    pub async fn wait_for_configuration(&self, timeout: Duration) -> Option<Arc<Configuration>> {
        let mut receiver = self.configuration.subscribe();
        let wait = async {
            // The sender lives in `self`, so the channel cannot close while we're waiting.
            receiver
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|configuration| configuration.clone())
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::ConfigurationStore;
    use crate::Configuration;

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());

        assert!(store.get_configuration().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(Arc::new(Configuration::default()));
            })
            .join();
        }

        assert!(store.get_configuration().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_configuration() {
        let store = ConfigurationStore::new();
        assert!(store
            .wait_for_configuration(Duration::from_secs(5))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_once_configuration_arrives() {
        let store = Arc::new(ConfigurationStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_for_configuration(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.set_configuration(Arc::new(Configuration::default()));

        assert!(waiter.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_loaded() {
        let store = ConfigurationStore::new();
        store.set_configuration(Arc::new(Configuration::default()));
        assert!(store
            .wait_for_configuration(Duration::ZERO)
            .await
            .is_some());
    }
}
