//! Flow-scoped bean storage.
//!
//! Beans of one flow instance live in two session attributes keyed by the
//! client window, the flow id and the flow depth:
//! `<window>_<flow>:<depth>_beans` and `<window>_<flow>:<depth>_creational`.
//! Every such key is also recorded in a per-session list so that
//! [`FlowScopedContext::session_destroyed`] can drop them all.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use faces_el::ScopeMap;
use faces_storage::{SessionStore, SessionStoreExt};
use tracing::{debug, warn};

use crate::context::{FacesContext, RequestState};
use crate::error::FlowError;
use crate::model::{Flow, FlowKey};

pub const PER_SESSION_BEAN_MAP_LIST: &str = "faces.flow.PER_SESSION_BEAN_MAP_LIST";
pub const PER_SESSION_CREATIONAL_LIST: &str = "faces.flow.PER_SESSION_CREATIONAL_LIST";

/// A created bean.
pub type BeanInstance = Arc<dyn Any + Send + Sync>;

// ──────────────────────────────────────────────
// Container contracts
// ──────────────────────────────────────────────

/// Book-keeping for one bean creation: dependents to release with the bean.
#[derive(Clone, Default)]
pub struct CreationalContext {
    dependents: Arc<Mutex<Vec<BeanInstance>>>,
}

impl CreationalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependent(&self, dependent: BeanInstance) {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dependent);
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn release(&self) {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for CreationalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreationalContext")
            .field("dependents", &self.dependent_count())
            .finish()
    }
}

/// A bean definition the flow scope can create and destroy.
pub trait Contextual: Send + Sync {
    fn name(&self) -> &str;

    /// Stable identifier across serialization. Flow-scoped beans must have
    /// one.
    fn passivation_id(&self) -> Option<&str>;

    /// The flow this bean is scoped to, if declared.
    fn flow(&self) -> Option<&FlowKey> {
        None
    }

    /// `Ok(None)` means the bean produced nothing and nothing is stored.
    fn create(&self, creational: &CreationalContext) -> Result<Option<BeanInstance>, FlowError>;

    fn destroy(&self, instance: BeanInstance, creational: &CreationalContext);
}

/// Looks bean definitions up by passivation id.
pub trait BeanManager: Send + Sync {
    fn passivation_capable_bean(&self, id: &str) -> Option<Arc<dyn Contextual>>;
}

/// In-memory [`BeanManager`].
#[derive(Default)]
pub struct BeanRegistry {
    beans: RwLock<HashMap<String, Arc<dyn Contextual>>>,
}

impl BeanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bean: Arc<dyn Contextual>) -> Result<(), FlowError> {
        let id = bean
            .passivation_id()
            .ok_or_else(|| FlowError::NotPassivationCapable {
                bean: bean.name().to_string(),
            })?
            .to_string();
        self.beans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, bean);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Contextual>> {
        self.beans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl BeanManager for BeanRegistry {
    fn passivation_capable_bean(&self, id: &str) -> Option<Arc<dyn Contextual>> {
        self.beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl fmt::Debug for BeanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let beans = self.beans.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = beans.keys().collect();
        ids.sort();
        f.debug_struct("BeanRegistry").field("beans", &ids).finish()
    }
}

/// Observer of flow scope lifecycle.
pub trait FlowListener: Send + Sync {
    /// Fired once the scope of a newly entered flow exists.
    fn flow_initialized(&self, _flow: &FlowKey) {}

    /// Fired after the beans of an exited flow were destroyed.
    fn flow_destroyed(&self, _flow: &FlowKey) {}
}

// ──────────────────────────────────────────────
// Session attributes
// ──────────────────────────────────────────────

#[derive(Default)]
struct BeanMap {
    beans: RwLock<HashMap<String, BeanInstance>>,
    flow_scope: Mutex<Option<ScopeMap>>,
    /// Serializes create-if-absent for this flow instance.
    creation: Mutex<()>,
}

impl BeanMap {
    fn get(&self, id: &str) -> Option<BeanInstance> {
        self.beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn flow_scope(&self) -> ScopeMap {
        self.flow_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(ScopeMap::new)
            .clone()
    }

    fn drain(&self) -> Vec<(String, BeanInstance)> {
        if let Some(scope) = self
            .flow_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            scope.clear();
        }
        self.beans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect()
    }
}

#[derive(Default)]
struct CreationalMap {
    contexts: RwLock<HashMap<String, CreationalContext>>,
}

impl CreationalMap {
    fn get(&self, id: &str) -> Option<CreationalContext> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn clear(&self) {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Default)]
struct KeyList(Mutex<Vec<String>>);

impl KeyList {
    fn push(&self, key: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(key);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Storage keys of one flow instance.
struct ScopeKeys {
    beans: String,
    creational: String,
}

impl ScopeKeys {
    fn new(request: &RequestState, flow: &Flow, depth: usize) -> Result<Self, FlowError> {
        let window = request
            .client_window()
            .ok_or(FlowError::ClientWindowUnavailable)?;
        let prefix = format!("{}:{}", flow.client_window_flow_id(window.id()), depth);
        Ok(Self {
            beans: format!("{prefix}_beans"),
            creational: format!("{prefix}_creational"),
        })
    }
}

/// Handles to the two maps of one flow instance.
struct ScopeMaps<'a> {
    session: &'a dyn SessionStore,
    keys: ScopeKeys,
    beans: Arc<BeanMap>,
    creational: Arc<CreationalMap>,
}

impl<'a> ScopeMaps<'a> {
    /// Fetch the maps, creating and recording missing ones.
    fn open(session: &'a dyn SessionStore, keys: ScopeKeys) -> Result<Self, FlowError> {
        let beans = match session.get_typed::<BeanMap>(&keys.beans)? {
            Some(map) => map,
            None => {
                let map = Arc::new(BeanMap::default());
                session.put_shared(&keys.beans, map.clone())?;
                record_key(session, PER_SESSION_BEAN_MAP_LIST, &keys.beans)?;
                map
            }
        };
        let creational = match session.get_typed::<CreationalMap>(&keys.creational)? {
            Some(map) => map,
            None => {
                let map = Arc::new(CreationalMap::default());
                session.put_shared(&keys.creational, map.clone())?;
                record_key(session, PER_SESSION_CREATIONAL_LIST, &keys.creational)?;
                map
            }
        };
        Ok(Self {
            session,
            keys,
            beans,
            creational,
        })
    }

    /// Write both maps back so replicating stores see the change.
    fn update_session(&self) -> Result<(), FlowError> {
        self.session.put_shared(&self.keys.beans, self.beans.clone())?;
        self.session
            .put_shared(&self.keys.creational, self.creational.clone())?;
        for list in [PER_SESSION_BEAN_MAP_LIST, PER_SESSION_CREATIONAL_LIST] {
            if let Some(keys) = self.session.get_typed::<KeyList>(list)? {
                self.session.put_shared(list, keys)?;
            }
        }
        Ok(())
    }
}

fn record_key(session: &dyn SessionStore, list: &str, key: &str) -> Result<(), FlowError> {
    let keys = match session.get_typed::<KeyList>(list)? {
        Some(keys) => keys,
        None => {
            let keys = Arc::new(KeyList::default());
            session.put_shared(list, keys.clone())?;
            keys
        }
    };
    keys.push(key.to_string());
    Ok(())
}

// ──────────────────────────────────────────────
// FlowScopedContext
// ──────────────────────────────────────────────

/// The flow scope: bean instances and the `flowScope` map of every active
/// flow instance.
pub struct FlowScopedContext {
    bean_manager: Arc<dyn BeanManager>,
    listeners: Vec<Arc<dyn FlowListener>>,
}

impl FlowScopedContext {
    pub fn new(bean_manager: Arc<dyn BeanManager>, listeners: Vec<Arc<dyn FlowListener>>) -> Self {
        Self {
            bean_manager,
            listeners,
        }
    }

    pub fn bean_manager(&self) -> &Arc<dyn BeanManager> {
        &self.bean_manager
    }

    /// Whether a flow is current for this request.
    pub fn is_active(&self, ctx: &FacesContext) -> Result<bool, FlowError> {
        Ok(ctx
            .application()
            .flow_handler()
            .current_flow(ctx)?
            .is_some())
    }

    /// The stored instance of `contextual` in the current flow, if any.
    pub fn get(
        &self,
        ctx: &FacesContext,
        contextual: &dyn Contextual,
    ) -> Result<Option<BeanInstance>, FlowError> {
        let (maps, id) = self.open_current(ctx, contextual)?;
        Ok(maps.beans.get(&id))
    }

    /// The stored instance of `contextual`, created if absent.
    ///
    /// Creation holds the flow instance's creation lock, so concurrent
    /// requests of one session create at most one instance per bean id.
    /// `Contextual::create` must not resolve beans of the same flow scope.
    pub fn get_or_create(
        &self,
        ctx: &FacesContext,
        contextual: &dyn Contextual,
        creational: CreationalContext,
    ) -> Result<Option<BeanInstance>, FlowError> {
        let (maps, id) = match self.open_current(ctx, contextual) {
            Err(FlowError::NoActiveFlow) => {
                return Err(match contextual.flow() {
                    Some(owner) => FlowError::ContextNotActive {
                        flow: owner.to_string(),
                    },
                    None => FlowError::NoActiveFlow,
                });
            }
            opened => opened?,
        };
        if let Some(existing) = maps.beans.get(&id) {
            return Ok(Some(existing));
        }

        let _creating = maps
            .beans
            .creation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = maps.beans.get(&id) {
            return Ok(Some(existing));
        }
        if let Some(owner) = contextual.flow() {
            let handler = ctx.application().flow_handler();
            if !handler.is_active(ctx, &owner.defining_document_id, &owner.id)? {
                return Err(FlowError::ContextNotActive {
                    flow: owner.to_string(),
                });
            }
        }
        let Some(instance) = contextual.create(&creational)? else {
            return Ok(None);
        };
        debug!(bean = %id, "created flow-scoped bean");
        maps.beans
            .beans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), instance.clone());
        maps.creational
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, creational);
        maps.update_session()?;
        Ok(Some(instance))
    }

    /// The `flowScope` map of the current flow. Without a current flow this
    /// is a fresh, unattached empty map.
    pub fn current_flow_scope(&self, ctx: &FacesContext) -> Result<ScopeMap, FlowError> {
        self.current_flow_scope_for(ctx.application().flow_handler(), ctx.request())
    }

    pub(crate) fn current_flow_scope_for(
        &self,
        handler: &crate::handler::FlowHandler,
        request: &RequestState,
    ) -> Result<ScopeMap, FlowError> {
        let (Some(session), Some((flow, depth))) = (request.session(), handler.position_for(request)?)
        else {
            return Ok(ScopeMap::new());
        };
        let maps = ScopeMaps::open(session.as_ref(), ScopeKeys::new(request, &flow, depth)?)?;
        let scope = maps.beans.flow_scope();
        maps.update_session()?;
        Ok(scope)
    }

    fn open_current<'a>(
        &self,
        ctx: &'a FacesContext,
        contextual: &dyn Contextual,
    ) -> Result<(ScopeMaps<'a>, String), FlowError> {
        let request = ctx.request();
        let position = ctx.application().flow_handler().position_for(request)?;
        let (Some(session), Some((flow, depth))) = (request.session(), position) else {
            return Err(FlowError::NoActiveFlow);
        };
        let id = contextual
            .passivation_id()
            .ok_or_else(|| FlowError::NotPassivationCapable {
                bean: contextual.name().to_string(),
            })?
            .to_string();
        let maps = ScopeMaps::open(session.as_ref(), ScopeKeys::new(request, &flow, depth)?)?;
        Ok((maps, id))
    }

    /// Create the maps of the flow just pushed and announce it.
    pub(crate) fn flow_entered(
        &self,
        request: &RequestState,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), FlowError> {
        let Some(session) = request.session() else {
            return Ok(());
        };
        let maps = ScopeMaps::open(session.as_ref(), ScopeKeys::new(request, flow, depth)?)?;
        maps.beans.flow_scope();
        maps.update_session()?;
        for listener in &self.listeners {
            listener.flow_initialized(flow.key());
        }
        Ok(())
    }

    /// Destroy every bean of the flow instance at `depth` and clear its
    /// storage.
    pub(crate) fn flow_exited(
        &self,
        request: &RequestState,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), FlowError> {
        let Some(session) = request.session() else {
            return Ok(());
        };
        let maps = ScopeMaps::open(session.as_ref(), ScopeKeys::new(request, flow, depth)?)?;
        for (id, bean) in maps.beans.drain() {
            let creational = maps.creational.get(&id).unwrap_or_default();
            match self.bean_manager.passivation_capable_bean(&id) {
                Some(owner) => owner.destroy(bean, &creational),
                None => warn!(
                    bean = %id,
                    flow = %flow.key(),
                    "no bean definition found while destroying flow-scoped bean"
                ),
            }
        }
        maps.creational.clear();
        maps.update_session()?;
        debug!(flow = %flow.key(), depth, "flow scope destroyed");
        for listener in &self.listeners {
            listener.flow_destroyed(flow.key());
        }
        Ok(())
    }

    /// Drop every flow-scope attribute ever created in `session`. Destroy
    /// hooks are not run.
    pub fn session_destroyed(&self, session: &dyn SessionStore) -> Result<(), FlowError> {
        if let Some(list) = session.get_typed::<KeyList>(PER_SESSION_BEAN_MAP_LIST)? {
            for key in list.take() {
                if let Some(map) = session.get_typed::<BeanMap>(&key)? {
                    map.drain();
                }
                session.remove(&key)?;
            }
            session.remove(PER_SESSION_BEAN_MAP_LIST)?;
        }
        if let Some(list) = session.get_typed::<KeyList>(PER_SESSION_CREATIONAL_LIST)? {
            for key in list.take() {
                if let Some(map) = session.get_typed::<CreationalMap>(&key)? {
                    map.clear();
                }
                session.remove(&key)?;
            }
            session.remove(PER_SESSION_CREATIONAL_LIST)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FlowScopedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowScopedContext")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
