use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    bridge::NativeBridge,
    capability::types::{
        Capability, CapabilityContext, CapabilityCore, CapabilityError, CapabilityResult,
    },
    coordinator::{OperationCoordinator, StartStatus},
    event_bus::Value,
    event_registry::{EventInfo, ParameterType},
};

pub const LOGIN_COMPLETE: &str = "LoginComplete";
pub const LOGOUT_COMPLETE: &str = "LogoutComplete";

/// Sign-in against the platform account service.
///
/// `login` and `logout` are independent operations; a second `login` while
/// one is pending supersedes it.
pub struct AccountCapability {
    core: Arc<CapabilityCore>,
    coordinator: Arc<OperationCoordinator>,
    bridge: Arc<dyn NativeBridge>,
}

impl AccountCapability {
    pub const ID: &'static str = "account";

    pub fn new(
        context: &CapabilityContext,
        bridge: Arc<dyn NativeBridge>,
    ) -> CapabilityResult<Self> {
        let core = context.new_core(Self::ID);
        core.declare_event(
            EventInfo::new(LOGIN_COMPLETE).parameter("user_id", ParameterType::String),
        )?;
        core.declare_event(EventInfo::new(LOGOUT_COMPLETE))?;
        Ok(Self {
            core,
            coordinator: context.coordinator(),
            bridge,
        })
    }

    pub fn login(&self, username: &str, password: &str) -> CapabilityResult<StartStatus> {
        if username.trim().is_empty() {
            return Err(CapabilityError::invalid_argument("login", "username is empty"));
        }
        if password.is_empty() {
            return Err(CapabilityError::invalid_argument("login", "password is empty"));
        }
        debug!(username, "login requested");

        let mut args = HashMap::new();
        args.insert("username".to_string(), Value::from(username));
        args.insert("password".to_string(), Value::from(password));
        Ok(self.coordinator.start_native(
            &self.core,
            "login",
            LOGIN_COMPLETE,
            self.bridge.clone(),
            args,
        ))
    }

    pub fn logout(&self) -> StartStatus {
        self.coordinator.start_native(
            &self.core,
            "logout",
            LOGOUT_COMPLETE,
            self.bridge.clone(),
            HashMap::new(),
        )
    }
}

impl Capability for AccountCapability {
    fn core(&self) -> &Arc<CapabilityCore> {
        &self.core
    }
}
