//! Composite components and the collaborators that track which one is current.
//!
//! The real component tree is far richer than this. Expressions only need
//! three things from it: find a component by client id, know which composite
//! component is being built or evaluated, and get told once when a component
//! is attached to the view.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::context::ElContext;
use crate::expression::Location;

/// Handle returned by [`CompositeComponent::subscribe_post_add`].
pub type SubscriptionId = u64;

type PostAddListener = Arc<dyn Fn(&PostAddEvent<'_>) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ──────────────────────────────────────────────
// Composite component
// ──────────────────────────────────────────────

/// A reusable component instance defined by a resource in a library.
pub struct CompositeComponent {
    client_id: String,
    library: String,
    resource: String,
    parent: Option<Arc<CompositeComponent>>,
    listeners: Mutex<Vec<(SubscriptionId, PostAddListener)>>,
    next_subscription: AtomicU64,
}

impl CompositeComponent {
    pub fn new(
        client_id: impl Into<String>,
        library: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            library: library.into(),
            resource: resource.into(),
            parent: None,
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Nest this component inside another composite component.
    pub fn with_parent(mut self, parent: Arc<CompositeComponent>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The closest enclosing composite component.
    pub fn composite_parent(&self) -> Option<&Arc<CompositeComponent>> {
        self.parent.as_ref()
    }

    /// Whether an expression authored at `location` belongs to this
    /// component's defining resource.
    pub fn defined_at(&self, location: &Location) -> bool {
        let path = &location.path;
        path.ends_with(&format!("/{}", self.resource)) && path.contains(self.library.as_str())
    }

    pub fn subscribe_post_add<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PostAddEvent<'_>) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe_post_add(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    pub fn post_add_listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Notify post-add listeners. Listeners run without the listener lock
    /// held and may unsubscribe themselves through the event.
    pub fn publish_post_add(&self) {
        let listeners: Vec<_> = lock(&self.listeners).clone();
        for (id, listener) in listeners {
            let event = PostAddEvent {
                component: self,
                subscription: id,
                unsubscribed: Cell::new(false),
            };
            listener(&event);
            if event.unsubscribed.get() {
                self.unsubscribe_post_add(id);
            }
        }
    }
}

impl fmt::Debug for CompositeComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeComponent")
            .field("client_id", &self.client_id)
            .field("library", &self.library)
            .field("resource", &self.resource)
            .field(
                "parent",
                &self.parent.as_ref().map(|p| p.client_id().to_string()),
            )
            .finish()
    }
}

/// Delivered to post-add listeners.
pub struct PostAddEvent<'a> {
    component: &'a CompositeComponent,
    subscription: SubscriptionId,
    unsubscribed: Cell<bool>,
}

impl PostAddEvent<'_> {
    pub fn component(&self) -> &CompositeComponent {
        self.component
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Remove the listener receiving this event once it returns.
    pub fn unsubscribe(&self) {
        self.unsubscribed.set(true);
    }
}

// ──────────────────────────────────────────────
// View tree
// ──────────────────────────────────────────────

pub trait ViewTree: Send + Sync {
    fn find_component(&self, client_id: &str) -> Option<Arc<CompositeComponent>>;

    /// The composite component whose template is currently being applied.
    fn current_composite_component(&self) -> Option<Arc<CompositeComponent>>;
}

/// In-memory view: a client-id index plus a stack of composite components
/// being built.
#[derive(Default)]
pub struct ComponentTree {
    components: RwLock<HashMap<String, Arc<CompositeComponent>>>,
    building: Mutex<Vec<Arc<CompositeComponent>>>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component to the view and publish its post-add event.
    pub fn attach(&self, component: Arc<CompositeComponent>) {
        {
            let mut components = self.components.write().unwrap_or_else(|p| p.into_inner());
            components.insert(component.client_id().to_string(), component.clone());
        }
        component.publish_post_add();
    }

    pub fn detach(&self, client_id: &str) -> Option<Arc<CompositeComponent>> {
        let mut components = self.components.write().unwrap_or_else(|p| p.into_inner());
        components.remove(client_id)
    }

    pub fn begin_composite(&self, component: Arc<CompositeComponent>) {
        lock(&self.building).push(component);
    }

    pub fn end_composite(&self) -> Option<Arc<CompositeComponent>> {
        lock(&self.building).pop()
    }
}

impl ViewTree for ComponentTree {
    fn find_component(&self, client_id: &str) -> Option<Arc<CompositeComponent>> {
        let components = self.components.read().unwrap_or_else(|p| p.into_inner());
        components.get(client_id).cloned()
    }

    fn current_composite_component(&self) -> Option<Arc<CompositeComponent>> {
        lock(&self.building).last().cloned()
    }
}

// ──────────────────────────────────────────────
// Stack manager
// ──────────────────────────────────────────────

/// Tracks the composite component expressions evaluate against.
pub trait CompositeStackManager: Send + Sync {
    /// The component whose defining resource matches `location`, falling
    /// back to the current composite component.
    fn find_using_location(
        &self,
        ctx: &ElContext,
        location: &Location,
    ) -> Option<Arc<CompositeComponent>>;

    /// Push `component`, or with `None` the composite parent of the current
    /// one. Returns whether anything was pushed; callers pop only then.
    fn push(&self, ctx: &ElContext, component: Option<Arc<CompositeComponent>>) -> bool;

    fn pop(&self, ctx: &ElContext);

    fn peek(&self, ctx: &ElContext) -> Option<Arc<CompositeComponent>>;
}

/// In-memory stack manager with separate tree-creation and evaluation
/// stacks.
#[derive(Default)]
pub struct StackManager {
    tree_creation: Mutex<Vec<Arc<CompositeComponent>>>,
    evaluation: Mutex<Vec<Arc<CompositeComponent>>>,
}

impl StackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tree_creation(&self, component: Arc<CompositeComponent>) {
        lock(&self.tree_creation).push(component);
    }

    pub fn pop_tree_creation(&self) -> Option<Arc<CompositeComponent>> {
        lock(&self.tree_creation).pop()
    }

    pub fn evaluation_depth(&self) -> usize {
        lock(&self.evaluation).len()
    }
}

impl CompositeStackManager for StackManager {
    fn find_using_location(
        &self,
        ctx: &ElContext,
        location: &Location,
    ) -> Option<Arc<CompositeComponent>> {
        let building: Vec<_> = lock(&self.tree_creation).clone();
        if !building.is_empty() {
            if let Some(found) = building.iter().rev().find(|cc| cc.defined_at(location)) {
                return Some(found.clone());
            }
        } else {
            let mut cursor = ctx.current_composite_component();
            while let Some(cc) = cursor {
                if cc.defined_at(location) {
                    return Some(cc);
                }
                cursor = cc.composite_parent().cloned();
            }
        }
        // A #{cc} one level up: use the current composite component.
        ctx.current_composite_component()
    }

    fn push(&self, ctx: &ElContext, component: Option<Arc<CompositeComponent>>) -> bool {
        let building = !lock(&self.tree_creation).is_empty();
        let component = match component {
            Some(cc) => Some(cc),
            // While the tree is being built there is no reliable parent to derive.
            None if building => None,
            None => {
                let top = lock(&self.evaluation).last().cloned();
                top.or_else(|| ctx.current_composite_component())
                    .and_then(|cc| cc.composite_parent().cloned())
            }
        };
        match component {
            Some(cc) => {
                lock(&self.evaluation).push(cc);
                true
            }
            None => false,
        }
    }

    fn pop(&self, _ctx: &ElContext) {
        lock(&self.evaluation).pop();
    }

    fn peek(&self, _ctx: &ElContext) -> Option<Arc<CompositeComponent>> {
        lock(&self.evaluation).last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cc(id: &str, resource: &str) -> Arc<CompositeComponent> {
        Arc::new(CompositeComponent::new(id, "ezcomp", resource))
    }

    #[test]
    fn location_match_needs_resource_suffix_and_library() {
        let panel = cc("form:panel", "panel.xhtml");
        assert!(panel.defined_at(&Location::aliased("/resources/ezcomp/panel.xhtml")));
        assert!(!panel.defined_at(&Location::aliased("/resources/other/panel.xhtml")));
        assert!(!panel.defined_at(&Location::aliased("/resources/ezcomp/mypanel.xhtml")));
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let component = cc("a", "a.xhtml");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        component.subscribe_post_add(move |event| {
            seen.fetch_add(1, Ordering::SeqCst);
            event.unsubscribe();
        });
        component.subscribe_post_add(|_| {});

        component.publish_post_add();
        component.publish_post_add();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(component.post_add_listener_count(), 1);
    }

    #[test]
    fn tree_creation_stack_is_searched_top_down() {
        let manager = StackManager::new();
        let outer = cc("outer", "box.xhtml");
        let inner = cc("inner", "box.xhtml");
        manager.push_tree_creation(outer);
        manager.push_tree_creation(inner);

        let ctx = ElContext::new();
        let found = manager.find_using_location(&ctx, &Location::aliased("/ezcomp/box.xhtml"));
        assert_eq!(found.map(|c| c.client_id().to_string()), Some("inner".to_string()));
    }

    #[test]
    fn runtime_lookup_walks_composite_parents() {
        let manager = Arc::new(StackManager::new());
        let outer = cc("outer", "outer.xhtml");
        let inner = Arc::new(CompositeComponent::new("inner", "ezcomp", "inner.xhtml").with_parent(outer));
        let ctx = ElContext::new().with_stack_manager(manager.clone());
        assert!(manager.push(&ctx, Some(inner)));

        let found = manager.find_using_location(&ctx, &Location::aliased("/ezcomp/outer.xhtml"));
        assert_eq!(found.map(|c| c.client_id().to_string()), Some("outer".to_string()));

        // no match falls back to the current composite component
        let fallback = manager.find_using_location(&ctx, &Location::aliased("/x/none.xhtml"));
        assert_eq!(fallback.map(|c| c.client_id().to_string()), Some("inner".to_string()));
    }

    #[test]
    fn push_none_uses_parent_of_top() {
        let manager = Arc::new(StackManager::new());
        let ctx = ElContext::new().with_stack_manager(manager.clone());
        assert!(!manager.push(&ctx, None));

        let outer = cc("outer", "outer.xhtml");
        let inner = Arc::new(CompositeComponent::new("inner", "ezcomp", "inner.xhtml").with_parent(outer));
        manager.push(&ctx, Some(inner));
        assert!(manager.push(&ctx, None));
        assert_eq!(manager.evaluation_depth(), 2);
        assert_eq!(manager.peek(&ctx).map(|c| c.client_id().to_string()), Some("outer".to_string()));

        // outer has no parent
        assert!(!manager.push(&ctx, None));
        manager.pop(&ctx);
        manager.pop(&ctx);
        assert_eq!(manager.evaluation_depth(), 0);
    }

    #[test]
    fn push_none_during_tree_creation_pushes_nothing() {
        let manager = Arc::new(StackManager::new());
        let ctx = ElContext::new().with_stack_manager(manager.clone());
        let outer = cc("outer", "outer.xhtml");
        let inner = Arc::new(CompositeComponent::new("inner", "ezcomp", "inner.xhtml").with_parent(outer));
        manager.push_tree_creation(inner.clone());
        manager.push(&ctx, Some(inner));

        assert!(!manager.push(&ctx, None));
        assert_eq!(manager.evaluation_depth(), 1);

        manager.pop(&ctx);
        manager.pop_tree_creation();
        assert_eq!(manager.evaluation_depth(), 0);
    }

    #[test]
    fn view_tree_attach_publishes_and_indexes() {
        let tree = ComponentTree::new();
        let component = cc("f:c", "c.xhtml");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        component.subscribe_post_add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tree.attach(component);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(tree.find_component("f:c").is_some());
        assert!(tree.find_component("missing").is_none());
    }
}
