use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard},
};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, info, instrument};

use crate::{
    dispatcher::Dispatcher,
    event_bus::{Event, OriginId, Value},
    event_registry::builtin,
};

use super::types::{
    Capability, CapabilityContext, CapabilityError, CapabilityId, CapabilityResult,
};

type Factory = Arc<dyn Fn(&CapabilityContext) -> CapabilityResult<Constructed> + Send + Sync>;
type SupportCheck = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
struct Constructed {
    capability: Arc<dyn Capability>,
    any: Arc<dyn Any + Send + Sync>,
}

#[derive(Clone)]
struct Registration {
    factory: Factory,
    supported: SupportCheck,
}

type InstanceCell = Arc<Mutex<Option<Constructed>>>;

/// Owns the single instance of every capability class.
///
/// Instances are built lazily by their factory on first request. Concurrent
/// first requests for the same id wait on a per-id lock, so the factory runs
/// once. `shutdown` tears every instance down; the next request builds a
/// fresh one.
pub struct CapabilityRegistry {
    context: CapabilityContext,
    registrations: DashMap<CapabilityId, Registration>,
    instances: DashMap<CapabilityId, InstanceCell>,
    lifecycle: Dispatcher,
}

impl CapabilityRegistry {
    pub fn new(context: CapabilityContext) -> Self {
        let tap_capacity = context.config().event_buffer_size;
        Self {
            context,
            registrations: DashMap::new(),
            instances: DashMap::new(),
            lifecycle: Dispatcher::new(OriginId::new(), tap_capacity),
        }
    }

    pub fn context(&self) -> &CapabilityContext {
        &self.context
    }

    /// Registers a factory for a capability that is supported everywhere.
    pub fn register_factory<T, F>(
        &self,
        id: impl Into<CapabilityId>,
        factory: F,
    ) -> CapabilityResult<()>
    where
        T: Capability,
        F: Fn(&CapabilityContext) -> CapabilityResult<T> + Send + Sync + 'static,
    {
        self.register_factory_with_support(id, factory, || true)
    }

    pub fn register_factory_with_support<T, F, S>(
        &self,
        id: impl Into<CapabilityId>,
        factory: F,
        supported: S,
    ) -> CapabilityResult<()>
    where
        T: Capability,
        F: Fn(&CapabilityContext) -> CapabilityResult<T> + Send + Sync + 'static,
        S: Fn() -> bool + Send + Sync + 'static,
    {
        let id = id.into();
        let factory: Factory = Arc::new(move |context: &CapabilityContext| {
            let instance = Arc::new(factory(context)?);
            Ok(Constructed {
                capability: instance.clone(),
                any: instance,
            })
        });

        match self.registrations.entry(id.clone()) {
            Entry::Occupied(_) => Err(CapabilityError::AlreadyRegistered(id)),
            Entry::Vacant(entry) => {
                debug!(capability = %id, "factory registered");
                entry.insert(Registration {
                    factory,
                    supported: Arc::new(supported),
                });
                Ok(())
            }
        }
    }

    /// Reports availability without constructing anything. Unknown ids and
    /// ids disabled in the config are unsupported.
    pub fn is_supported(&self, id: &str) -> bool {
        if self.context.config().is_disabled(id) {
            return false;
        }
        self.registrations
            .get(&CapabilityId::from(id))
            .is_some_and(|registration| (registration.supported)())
    }

    pub fn is_constructed(&self, id: &str) -> bool {
        self.instances
            .get(&CapabilityId::from(id))
            .is_some_and(|cell| lock(&cell).is_some())
    }

    pub fn get_instance(&self, id: &str) -> CapabilityResult<Arc<dyn Capability>> {
        self.constructed(id).map(|constructed| constructed.capability)
    }

    /// Typed access to the instance registered under `id`.
    pub fn get<T: Capability>(&self, id: &str) -> CapabilityResult<Arc<T>> {
        self.constructed(id)?
            .any
            .downcast::<T>()
            .map_err(|_| CapabilityError::TypeMismatch(CapabilityId::from(id)))
    }

    #[instrument(level = "debug", skip(self))]
    fn constructed(&self, id: &str) -> CapabilityResult<Constructed> {
        let id = CapabilityId::from(id);
        let registration = self
            .registrations
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CapabilityError::NotFound(id.clone()))?;
        if self.context.config().is_disabled(id.as_str()) || !(registration.supported)() {
            return Err(CapabilityError::Unsupported(id));
        }

        let cell = self.instances.entry(id.clone()).or_default().clone();
        let constructed = {
            let mut slot = lock(&cell);
            if let Some(existing) = slot.as_ref() {
                return Ok(existing.clone());
            }
            let constructed = (registration.factory)(&self.context)?;
            *slot = Some(constructed.clone());
            constructed
        };

        info!(capability = %id, "capability constructed");
        self.emit_lifecycle(builtin::CAPABILITY_CONSTRUCTED, &id);
        Ok(constructed)
    }

    /// Tears down one instance. Returns false if it was not constructed.
    pub fn shutdown_capability(&self, id: &str) -> bool {
        let id = CapabilityId::from(id);
        let Some(cell) = self.instances.get(&id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let taken = lock(&cell).take();
        match taken {
            Some(constructed) => {
                constructed.capability.unregister_all();
                info!(capability = %id, "capability shut down");
                self.emit_lifecycle(builtin::CAPABILITY_SHUTDOWN, &id);
                true
            }
            None => false,
        }
    }

    /// Tears down every constructed instance and returns how many there were.
    pub fn shutdown(&self) -> usize {
        let mut ids: Vec<CapabilityId> = self
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids.iter()
            .filter(|id| self.shutdown_capability(id.as_str()))
            .count()
    }

    /// Dispatcher carrying `CapabilityConstructed` and `CapabilityShutdown`.
    pub fn lifecycle(&self) -> &Dispatcher {
        &self.lifecycle
    }

    fn emit_lifecycle(&self, event_type: &str, id: &CapabilityId) {
        let event = Event::new(event_type, self.lifecycle.origin())
            .with_parameter("capability_id", Value::String(id.to_string()));
        self.lifecycle.dispatch(&event);
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("registered", &self.registrations.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}

// A panicking factory poisons only its own cell; the slot is still None then.
fn lock(cell: &Mutex<Option<Constructed>>) -> MutexGuard<'_, Option<Constructed>> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
