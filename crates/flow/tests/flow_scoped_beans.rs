//! Flow-scoped bean lifecycle through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faces_flow::{
    Application, BeanInstance, BeanRegistry, Contextual, CreationalContext, FacesContext,
    FacesSettings, Flow, FlowBuilder, FlowError, FlowKey, FlowListener, FlowTarget,
};
use faces_storage::{MemorySession, SessionStore};

/// Counts creations and destructions; each instance carries its serial.
struct Counted {
    id: &'static str,
    flow: Option<FlowKey>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    delay: Duration,
}

impl Counted {
    fn new(id: &'static str, flow: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            flow: Some(FlowKey::new("", flow)),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }
}

impl Contextual for Counted {
    fn name(&self) -> &str {
        self.id
    }

    fn passivation_id(&self) -> Option<&str> {
        Some(self.id)
    }

    fn flow(&self) -> Option<&FlowKey> {
        self.flow.as_ref()
    }

    fn create(&self, _: &CreationalContext) -> Result<Option<BeanInstance>, FlowError> {
        std::thread::sleep(self.delay);
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Arc::new(serial)))
    }

    fn destroy(&self, _: BeanInstance, _: &CreationalContext) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records scope lifecycle events.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl FlowListener for Journal {
    fn flow_initialized(&self, flow: &FlowKey) {
        self.0.lock().unwrap().push(format!("+{}", flow.id));
    }

    fn flow_destroyed(&self, flow: &FlowKey) {
        self.0.lock().unwrap().push(format!("-{}", flow.id));
    }
}

struct Fixture {
    app: Arc<Application>,
    registry: Arc<BeanRegistry>,
    journal: Arc<Journal>,
    session: Arc<MemorySession>,
    flows: Vec<Arc<Flow>>,
}

impl Fixture {
    fn new() -> Self {
        let registry = Arc::new(BeanRegistry::new());
        let journal = Arc::new(Journal::default());
        let app = Application::builder(FacesSettings::default())
            .bean_manager(registry.clone())
            .listener(journal.clone())
            .build();
        let flows = ["cart", "survey"]
            .iter()
            .map(|id| {
                let mut b = FlowBuilder::new();
                b.id("", id);
                app.register_flow(&b).unwrap()
            })
            .collect();
        Self {
            app,
            registry,
            journal,
            session: Arc::new(MemorySession::new("s")),
            flows,
        }
    }

    fn ctx(&self) -> FacesContext {
        let session: Arc<dyn SessionStore> = self.session.clone();
        self.app
            .create_context(self.app.request(Some(session), Some("w")))
    }

    fn enter(&self, ctx: &FacesContext, index: usize) {
        self.app
            .flow_handler()
            .transition(
                ctx,
                None,
                &FlowTarget::Enter(self.flows[index].clone()),
                None,
                "/start.xhtml",
            )
            .unwrap();
    }

    fn abandon(&self, ctx: &FacesContext) {
        let source = self.app.flow_handler().current_flow(ctx).unwrap();
        self.app
            .flow_handler()
            .transition(ctx, source.as_ref(), &FlowTarget::Abandon, None, "/home.xhtml")
            .unwrap();
    }
}

fn serial(bean: &BeanInstance) -> usize {
    *bean.clone().downcast::<usize>().unwrap()
}

#[test]
fn exit_destroys_and_reentry_creates_fresh_instance() {
    let fx = Fixture::new();
    let bean = Counted::new("cartBean", "cart");
    fx.registry.register(bean.clone()).unwrap();
    let scope = fx.app.flow_scoped_context();
    let ctx = fx.ctx();

    fx.enter(&ctx, 0);
    let first = scope
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap()
        .unwrap();
    let again = scope
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert!(fx.session.contains("w_cart:1_beans").unwrap());
    assert!(fx.session.contains("w_cart:1_creational").unwrap());

    fx.abandon(&ctx);
    assert_eq!(bean.destroyed.load(Ordering::SeqCst), 1);

    fx.enter(&ctx, 0);
    assert!(scope.get(&ctx, &*bean).unwrap().is_none());
    let second = scope
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(serial(&second), 2);
    assert_eq!(bean.destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn bean_of_inactive_flow_is_rejected() {
    let fx = Fixture::new();
    let bean = Counted::new("surveyBean", "survey");
    let scope = fx.app.flow_scoped_context();
    let ctx = fx.ctx();

    fx.enter(&ctx, 0);
    let err = scope
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap_err();
    assert!(matches!(err, FlowError::ContextNotActive { .. }));
    assert_eq!(bean.created.load(Ordering::SeqCst), 0);
}

#[test]
fn scope_requires_a_current_flow() {
    let fx = Fixture::new();
    let bean = Counted::new("cartBean", "cart");
    let scope = fx.app.flow_scoped_context();
    let ctx = fx.ctx();

    assert!(!scope.is_active(&ctx).unwrap());
    assert!(matches!(
        scope.get(&ctx, &*bean),
        Err(FlowError::NoActiveFlow)
    ));
    fx.enter(&ctx, 0);
    assert!(scope.is_active(&ctx).unwrap());
}

#[test]
fn creating_without_any_flow_names_the_owner() {
    let fx = Fixture::new();
    let owned = Counted::new("cartBean", "cart");
    let scope = fx.app.flow_scoped_context();
    let ctx = fx.ctx();

    match scope.get_or_create(&ctx, &*owned, CreationalContext::new()).err() {
        Some(FlowError::ContextNotActive { flow }) => assert!(flow.contains("id=cart")),
        other => panic!("expected ContextNotActive, got {other:?}"),
    }
    assert_eq!(owned.created.load(Ordering::SeqCst), 0);

    let ownerless = Arc::new(Counted {
        id: "looseBean",
        flow: None,
        created: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
        delay: Duration::ZERO,
    });
    assert!(matches!(
        scope.get_or_create(&ctx, &*ownerless, CreationalContext::new()),
        Err(FlowError::NoActiveFlow)
    ));
}

#[test]
fn beans_need_a_passivation_id() {
    struct Anonymous;
    impl Contextual for Anonymous {
        fn name(&self) -> &str {
            "anonymous"
        }
        fn passivation_id(&self) -> Option<&str> {
            None
        }
        fn create(&self, _: &CreationalContext) -> Result<Option<BeanInstance>, FlowError> {
            Ok(None)
        }
        fn destroy(&self, _: BeanInstance, _: &CreationalContext) {}
    }

    let fx = Fixture::new();
    let ctx = fx.ctx();
    fx.enter(&ctx, 0);
    let err = fx
        .app
        .flow_scoped_context()
        .get(&ctx, &Anonymous)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "FlowScoped bean anonymous must be PassivationCapable, but is not."
    );
}

#[test]
fn concurrent_requests_create_one_instance() {
    let fx = Fixture::new();
    let bean = Arc::new(Counted {
        delay: Duration::from_millis(20),
        ..Arc::into_inner(Counted::new("cartBean", "cart")).unwrap()
    });
    fx.registry.register(bean.clone()).unwrap();
    fx.enter(&fx.ctx(), 0);

    let serials: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fx = &fx;
                let bean = bean.clone();
                s.spawn(move || {
                    let ctx = fx.ctx();
                    let instance = fx
                        .app
                        .flow_scoped_context()
                        .get_or_create(&ctx, &*bean, CreationalContext::new())
                        .unwrap()
                        .unwrap();
                    serial(&instance)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(serials.iter().all(|&s| s == 1));
    assert_eq!(bean.created.load(Ordering::SeqCst), 1);
}

#[test]
fn listeners_see_enter_and_exit() {
    let fx = Fixture::new();
    let ctx = fx.ctx();
    fx.enter(&ctx, 1);
    fx.abandon(&ctx);
    assert_eq!(*fx.journal.0.lock().unwrap(), ["+survey", "-survey"]);
}

#[test]
fn missing_bean_definition_does_not_stop_exit() {
    let fx = Fixture::new();
    let bean = Counted::new("orphan", "cart");
    let scope = fx.app.flow_scoped_context();
    let ctx = fx.ctx();

    fx.enter(&ctx, 0);
    scope
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap();
    fx.abandon(&ctx);
    assert_eq!(bean.destroyed.load(Ordering::SeqCst), 0);
    assert!(fx.app.flow_handler().current_flow(&ctx).unwrap().is_none());
}

#[test]
fn session_end_sweeps_every_flow_map() {
    let fx = Fixture::new();
    let bean = Counted::new("cartBean", "cart");
    fx.registry.register(bean.clone()).unwrap();
    let ctx = fx.ctx();

    fx.enter(&ctx, 0);
    fx.app
        .flow_scoped_context()
        .get_or_create(&ctx, &*bean, CreationalContext::new())
        .unwrap();
    fx.app.session_destroyed(&*fx.session).unwrap();

    let keys = fx.session.keys().unwrap();
    assert_eq!(keys, ["w_flowStack"]);
    assert_eq!(bean.destroyed.load(Ordering::SeqCst), 0);
}
