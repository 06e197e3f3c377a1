use capflow_core::{Capability, EngineId, EngineLookup, Error, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::handler::{CapabilityHandler, HandlerContext};

/// A capability's owning engine and the handler that implements it.
#[derive(Clone)]
pub struct RoutingEntry {
    pub engine_id: EngineId,
    pub handler: Arc<dyn CapabilityHandler>,
}

impl fmt::Debug for RoutingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEntry")
            .field("engine_id", &self.engine_id)
            .finish_non_exhaustive()
    }
}

/// Uniform envelope for every invocation: success, handler failure, or
/// unknown capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityCallResult {
    pub success: bool,
    /// Runtimes that answer with `output` instead of `data` are accepted too.
    #[serde(default, alias = "output", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<EngineId>,
    pub capability: Capability,
}

impl CapabilityCallResult {
    pub fn ok(capability: impl Into<Capability>, engine_id: impl Into<EngineId>, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            engine_id: Some(engine_id.into()),
            capability: capability.into(),
        }
    }

    pub fn failed(
        capability: impl Into<Capability>,
        engine_id: Option<EngineId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            engine_id,
            capability: capability.into(),
        }
    }

    pub fn not_found(capability: impl Into<Capability>) -> Self {
        let capability = capability.into();
        let error = format!("Capability \"{}\" not found", capability);
        Self::failed(capability, None, error)
    }
}

/// Read-only view of registered routes, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: HashMap<Capability, RoutingEntry>,
    order: Vec<Capability>,
}

impl RoutingTable {
    pub fn get(&self, capability: &str) -> Option<&RoutingEntry> {
        self.entries.get(capability)
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.entries.contains_key(capability)
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Capability, &RoutingEntry)> {
        self.order
            .iter()
            .filter_map(move |cap| self.entries.get(cap).map(|entry| (cap, entry)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn insert(&mut self, capability: Capability, entry: RoutingEntry) {
        self.order.push(capability.clone());
        self.entries.insert(capability, entry);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// 能力路由器: capability → (engine, handler)
///
/// Owned per process or per test; there is no global instance. Registration
/// and `clear` are setup/teardown operations, `call` never touches the table.
pub struct CapabilityRouter {
    table: RoutingTable,
    context: HandlerContext,
}

impl Default for CapabilityRouter {
    fn default() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }
}

impl CapabilityRouter {
    pub fn new(context: Value) -> Self {
        Self {
            table: RoutingTable::default(),
            context: Arc::new(context),
        }
    }

    /// Builds a router from `(engine, handlers)` groups, registered in order.
    pub fn with_engines<E, H, C>(engines: E, context: Value) -> Result<Self>
    where
        E: IntoIterator<Item = (EngineId, H)>,
        H: IntoIterator<Item = (C, Arc<dyn CapabilityHandler>)>,
        C: Into<Capability>,
    {
        let mut router = Self::new(context);
        for (engine_id, handlers) in engines {
            router.register_engine(engine_id, handlers)?;
        }
        Ok(router)
    }

    /// Binds `capability` to `handler` under `engine_id`.
    ///
    /// The first registrant keeps the capability; a second registration fails
    /// with [`Error::DuplicateRegistration`] naming the existing owner.
    pub fn register(
        &mut self,
        capability: impl Into<Capability>,
        engine_id: impl Into<EngineId>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<()> {
        let capability = capability.into();
        let engine_id = engine_id.into();

        if let Some(existing) = self.table.get(capability.as_str()) {
            return Err(Error::DuplicateRegistration {
                capability: capability.to_string(),
                engine: existing.engine_id.to_string(),
            });
        }

        info!(capability = %capability, engine = %engine_id, "registered capability");
        self.table.insert(capability, RoutingEntry { engine_id, handler });
        Ok(())
    }

    /// Registers every handler of one engine. Stops at the first failure;
    /// entries registered before it stay registered.
    pub fn register_engine<H, C>(&mut self, engine_id: impl Into<EngineId>, handlers: H) -> Result<()>
    where
        H: IntoIterator<Item = (C, Arc<dyn CapabilityHandler>)>,
        C: Into<Capability>,
    {
        let engine_id = engine_id.into();
        for (capability, handler) in handlers {
            self.register(capability, engine_id.clone(), handler)?;
        }
        Ok(())
    }

    /// Invokes the handler behind `capability` with the current context.
    ///
    /// Never fails: unknown capabilities, handler errors and handler panics
    /// all come back as `success: false` results.
    pub async fn call(&self, capability: &str, input: Value) -> CapabilityCallResult {
        let Some(route) = self.table.get(capability) else {
            debug!(capability = %capability, "capability not found");
            return CapabilityCallResult::not_found(capability);
        };

        debug!(capability = %capability, engine = %route.engine_id, "invoking capability");
        let invocation = route.handler.handle(input, Arc::clone(&self.context));

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(data)) => CapabilityCallResult::ok(capability, route.engine_id.clone(), data),
            Ok(Err(e)) => {
                warn!(capability = %capability, engine = %route.engine_id, error = %e, "capability handler failed");
                CapabilityCallResult::failed(capability, Some(route.engine_id.clone()), e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(capability = %capability, engine = %route.engine_id, error = %message, "capability handler panicked");
                CapabilityCallResult::failed(
                    capability,
                    Some(route.engine_id.clone()),
                    format!("Handler panicked: {}", message),
                )
            }
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.table.contains(capability)
    }

    pub fn get_engine_for_capability(&self, capability: &str) -> Option<&EngineId> {
        self.table.get(capability).map(|route| &route.engine_id)
    }

    /// Registered capabilities in registration order.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.table.capabilities().to_vec()
    }

    /// Snapshot of the routing table; later registrations do not show up in it.
    pub fn routing_table(&self) -> RoutingTable {
        self.table.clone()
    }

    pub fn set_context(&mut self, context: Value) {
        self.context = Arc::new(context);
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    /// Drops every registration. Calling it again is a no-op.
    pub fn clear(&mut self) {
        if !self.table.is_empty() {
            info!(count = self.table.len(), "cleared capability routes");
        }
        self.table.clear();
    }
}

impl EngineLookup for CapabilityRouter {
    fn engine_for_capability(&self, capability: &str) -> Option<EngineId> {
        self.get_engine_for_capability(capability).cloned()
    }
}

/// Text of a caught panic payload, for failure results.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
