use std::{path::Path, sync::Arc};

use tracing::info;

use crate::{
    bridge::NativeBridge,
    capabilities::{AccountCapability, StorageCapability},
    capability::{
        registry::CapabilityRegistry,
        types::{Capability, CapabilityContext, CapabilityResult},
    },
    config::PlatformConfig,
    coordinator::OperationCoordinator,
    timestamp::Timestamp,
    InternalResult,
};

/// Process-wide context: built once at startup and passed by reference to
/// whoever needs a capability.
#[derive(Debug)]
pub struct Platform {
    config: Arc<PlatformConfig>,
    coordinator: Arc<OperationCoordinator>,
    registry: CapabilityRegistry,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Self {
        Timestamp::mark_origin();
        let coordinator = Arc::new(OperationCoordinator::new(&config));
        let config = Arc::new(config);
        let registry =
            CapabilityRegistry::new(CapabilityContext::new(config.clone(), coordinator.clone()));
        Self {
            config,
            coordinator,
            registry,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        Ok(Self::new(PlatformConfig::from_file(path)?))
    }

    /// A platform with the account and storage capabilities registered, both
    /// talking to `bridge`.
    pub fn with_reference_capabilities(
        config: PlatformConfig,
        bridge: Arc<dyn NativeBridge>,
    ) -> InternalResult<Self> {
        let platform = Self::new(config);

        let account_bridge = bridge.clone();
        platform
            .registry
            .register_factory(AccountCapability::ID, move |context| {
                AccountCapability::new(context, account_bridge.clone())
            })?;
        platform
            .registry
            .register_factory(StorageCapability::ID, move |context| {
                StorageCapability::new(context, bridge.clone())
            })?;

        Ok(platform)
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &OperationCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn get_instance(&self, id: &str) -> CapabilityResult<Arc<dyn Capability>> {
        self.registry.get_instance(id)
    }

    pub fn get<T: Capability>(&self, id: &str) -> CapabilityResult<Arc<T>> {
        self.registry.get(id)
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.registry.is_supported(id)
    }

    pub fn shutdown(&self) -> usize {
        let count = self.registry.shutdown();
        info!(capabilities = count, "platform shut down");
        count
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(PlatformConfig::default())
    }
}
