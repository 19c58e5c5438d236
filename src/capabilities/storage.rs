use std::{collections::HashMap, sync::Arc};

use crate::{
    bridge::NativeBridge,
    capability::types::{
        Capability, CapabilityContext, CapabilityCore, CapabilityError, CapabilityResult,
    },
    coordinator::{OperationCoordinator, StartStatus},
    event_bus::Value,
    event_registry::{EventInfo, ParameterType},
};

pub const UPLOAD_COMPLETE: &str = "UploadComplete";
pub const DOWNLOAD_COMPLETE: &str = "DownloadComplete";

/// Cloud storage: one file up, one file down.
pub struct StorageCapability {
    core: Arc<CapabilityCore>,
    coordinator: Arc<OperationCoordinator>,
    bridge: Arc<dyn NativeBridge>,
}

impl StorageCapability {
    pub const ID: &'static str = "storage";

    pub fn new(
        context: &CapabilityContext,
        bridge: Arc<dyn NativeBridge>,
    ) -> CapabilityResult<Self> {
        let core = context.new_core(Self::ID);
        core.declare_event(
            EventInfo::new(UPLOAD_COMPLETE)
                .parameter("path", ParameterType::String)
                .parameter("size", ParameterType::Int),
        )?;
        core.declare_event(
            EventInfo::new(DOWNLOAD_COMPLETE)
                .parameter("path", ParameterType::String)
                .parameter("data", ParameterType::String),
        )?;
        Ok(Self {
            core,
            coordinator: context.coordinator(),
            bridge,
        })
    }

    pub fn upload(&self, path: &str, data: &str) -> CapabilityResult<StartStatus> {
        let mut args = path_args("upload", path)?;
        args.insert("data".to_string(), Value::from(data));
        Ok(self.start("upload", UPLOAD_COMPLETE, args))
    }

    pub fn download(&self, path: &str) -> CapabilityResult<StartStatus> {
        let args = path_args("download", path)?;
        Ok(self.start("download", DOWNLOAD_COMPLETE, args))
    }

    fn start(
        &self,
        operation: &str,
        completion_type: &str,
        args: HashMap<String, Value>,
    ) -> StartStatus {
        self.coordinator.start_native(
            &self.core,
            operation,
            completion_type,
            self.bridge.clone(),
            args,
        )
    }
}

fn path_args(operation: &str, path: &str) -> CapabilityResult<HashMap<String, Value>> {
    if path.trim().is_empty() {
        return Err(CapabilityError::invalid_argument(operation, "path is empty"));
    }
    let mut args = HashMap::new();
    args.insert("path".to_string(), Value::from(path));
    Ok(args)
}

impl Capability for StorageCapability {
    fn core(&self) -> &Arc<CapabilityCore> {
        &self.core
    }
}
