//! Settings of the dispatch engine

use std::time::Duration;

use crate::transport::smtp::{authentication::Mechanism, extension::ClientId, DEFAULT_TIMEOUT};

/// Batch size used when a campaign does not set one
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Settings shared by every campaign run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatchConfig {
    /// Name sent during EHLO
    hello_name: ClientId,
    /// Connect and per-reply deadline
    timeout: Option<Duration>,
    /// Used when a campaign carries a batch size of 0
    default_batch_size: usize,
    /// Deliveries running at the same time inside a batch
    concurrency: usize,
    /// Mechanism used to authenticate
    auth_mechanism: Mechanism,
    /// Re-read the campaign status before each batch
    check_pause: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            hello_name: ClientId::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            default_batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            auth_mechanism: Mechanism::default(),
            check_pause: true,
        }
    }
}

impl DispatchConfig {
    /// Creates a builder starting from the default settings
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder {
            config: DispatchConfig::default(),
        }
    }

    /// Name sent during EHLO
    pub fn hello_name(&self) -> &ClientId {
        &self.hello_name
    }

    /// Connect and per-reply deadline
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Mechanism used to authenticate
    pub fn auth_mechanism(&self) -> Mechanism {
        self.auth_mechanism
    }

    /// Re-read the campaign status before each batch
    pub fn check_pause(&self) -> bool {
        self.check_pause
    }

    /// The batch size for a campaign asking for `requested`
    pub fn batch_size(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_batch_size.max(1),
            n => n,
        }
    }

    /// The worker pool size for batches of `batch_size` recipients
    pub fn concurrency(&self, batch_size: usize) -> usize {
        self.concurrency.clamp(1, batch_size.max(1))
    }
}

/// Builder for [`DispatchConfig`]
#[derive(Debug, Clone)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    /// Name sent during EHLO
    pub fn hello_name(mut self, name: ClientId) -> Self {
        self.config.hello_name = name;
        self
    }

    /// Set the timeout duration
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Batch size used when a campaign does not set one
    pub fn default_batch_size(mut self, size: usize) -> Self {
        self.config.default_batch_size = size;
        self
    }

    /// Deliveries running at the same time inside a batch
    ///
    /// Never exceeds the batch size of the running campaign.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the authentication mechanism to use
    pub fn auth_mechanism(mut self, mechanism: Mechanism) -> Self {
        self.config.auth_mechanism = mechanism;
        self
    }

    /// Whether a run stops when its campaign gets paused
    pub fn check_pause(mut self, check_pause: bool) -> Self {
        self.config.check_pause = check_pause;
        self
    }

    /// Build the config
    pub fn build(self) -> DispatchConfig {
        self.config
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();

        assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.auth_mechanism(), Mechanism::Login);
        assert!(config.check_pause());
        assert_eq!(config.batch_size(0), 10);
        assert_eq!(config.batch_size(5), 5);
        assert_eq!(config.concurrency(5), 1);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let config = DispatchConfig::builder().concurrency(8).build();
        assert_eq!(config.concurrency(5), 5);
        assert_eq!(config.concurrency(20), 8);

        let config = DispatchConfig::builder().concurrency(0).build();
        assert_eq!(config.concurrency(5), 1);
    }

    #[test]
    fn test_zero_default_batch_size() {
        let config = DispatchConfig::builder().default_batch_size(0).build();
        assert_eq!(config.batch_size(0), 1);
    }
}
