//! For Each - the live binding between a repeat site and its source list.
//!
//! A [`CollectionBinding`] owns one repeat site: the slot node the instances
//! render into, the frame the source expression is evaluated in, and the
//! [`InstanceTree`] holding the instances.
//!
//! # Invalidation
//!
//! A binding is marked dirty on the shared [`TickScheduler`] by two
//! observers, and never reconciles on its own:
//!
//! - the source list's [`CollectionSubscription`], on every mutation
//! - a watcher effect over the source expression, when a host property it
//!   reads is reassigned
//!
//! The watcher runs in its own effect scope so teardown stops it:
//!
//! ```text
//! effect_scope ─┬─ effect(evaluate source) ─► mark_dirty()   (not on first run)
//!               └─ on_scope_dispose(log)
//! ```
//!
//! # Pass
//!
//! 1. Evaluate the source in the host frame; it must be a list (or `null`
//!    with `null_as_empty`)
//! 2. If the list handle changed, resubscribe to it right away; the next
//!    successful pass reuses instances by position only
//! 3. Compute keys: positional, or evaluated and checked for collisions
//! 4. Hand the snapshot to the [`InstanceTree`]
//!
//! Steps 1, 3 and 4 can fail before the tree is touched. A failing pass
//! changes nothing in the tree and is reported as a [`BindingFailure`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use spark_signals::{effect, effect_scope, on_scope_dispose};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::engine::{
    CollectionSubscription, FlushOutcome, FlushTarget, Locals, LocalsFrame, ObservableCollection,
    TickScheduler,
};
use crate::error::{BindingFailure, ReconcileError};
use crate::expression::Evaluator;
use crate::renderer::{NodeTree, RepeatSpec, TemplateRegistry};
use crate::types::{BindingId, NodeId, Value};

use super::instance::{InstanceTree, Pass, ReconcileStats};
use super::reconcile::{evaluate_keys, positional_keys};

/// Cleanup function returned by the watcher scope.
pub type Cleanup = Box<dyn FnOnce()>;

// =============================================================================
// RenderContext
// =============================================================================

/// Everything the bindings of one surface share.
pub struct RenderContext {
    pub tree: RefCell<NodeTree>,
    pub templates: TemplateRegistry,
    pub evaluator: Rc<dyn Evaluator>,
    pub scheduler: TickScheduler,
    pub config: EngineConfig,
}

impl RenderContext {
    pub fn new(
        templates: TemplateRegistry,
        evaluator: Rc<dyn Evaluator>,
        scheduler: TickScheduler,
        config: EngineConfig,
    ) -> Self {
        Self {
            tree: RefCell::new(NodeTree::new()),
            templates,
            evaluator,
            scheduler,
            config,
        }
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("templates", &self.templates.len())
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// CollectionBinding
// =============================================================================

struct WatchedSource {
    list: ObservableCollection,
    _subscription: CollectionSubscription,
}

struct BindingState {
    spec: Rc<RepeatSpec>,
    slot: NodeId,
    host_frame: LocalsFrame,
    instances: InstanceTree,
    /// `None` before the first pass and while the source is `null`.
    source: Option<WatchedSource>,
    /// The list handle was replaced and no pass has succeeded since.
    replaced: bool,
    passes: u64,
}

/// Snapshot of one instance, for inspection.
#[derive(Debug, Clone)]
pub struct InstanceView {
    pub key: String,
    pub index: usize,
    pub roots: Vec<NodeId>,
    pub frame: LocalsFrame,
}

/// A repeat site bound to its source list.
pub struct CollectionBinding {
    id: BindingId,
    ctx: Rc<RenderContext>,
    state: RefCell<BindingState>,
    watcher: RefCell<Option<Cleanup>>,
    torn_down: Cell<bool>,
    weak_self: Weak<CollectionBinding>,
}

impl CollectionBinding {
    /// Bind a repeat site whose slot is already in the tree.
    ///
    /// Nothing renders until the first reconcile; the caller drives it
    /// (mount for top-level sites, the parent instance for nested ones).
    pub fn create(
        ctx: Rc<RenderContext>,
        spec: Rc<RepeatSpec>,
        slot: NodeId,
        host_frame: LocalsFrame,
    ) -> Rc<Self> {
        let id = ctx.scheduler.allocate_id();
        let binding = Rc::new_cyclic(|weak_self| Self {
            id,
            ctx,
            state: RefCell::new(BindingState {
                spec,
                slot,
                host_frame,
                instances: InstanceTree::new(),
                source: None,
                replaced: false,
                passes: 0,
            }),
            watcher: RefCell::new(None),
            torn_down: Cell::new(false),
            weak_self: weak_self.clone(),
        });

        let cleanup = binding.watch_expression();
        *binding.watcher.borrow_mut() = Some(cleanup);
        trace!(binding = %id, "binding created");
        binding
    }

    fn watch_expression(&self) -> Cleanup {
        let scope = effect_scope(true);
        let weak = self.weak_self.clone();
        let id = self.id;

        scope.run(move || {
            let first_run = Cell::new(true);
            let _effect_cleanup = effect(move || {
                let Some(binding) = weak.upgrade() else { return };
                if binding.torn_down.get() {
                    return;
                }
                binding.track_source();
                if first_run.replace(false) {
                    return;
                }
                trace!(binding = %binding.id, "source expression invalidated");
                binding.mark_dirty();
            });

            on_scope_dispose(move || {
                trace!(binding = %id, "watcher disposed");
            });
        });

        Box::new(move || {
            scope.stop();
        })
    }

    /// Read every host property the source expression depends on.
    fn track_source(&self) {
        let Ok(state) = self.state.try_borrow() else {
            return;
        };
        let source = state.spec.directive.source.clone();
        let frame = state.host_frame.clone();
        drop(state);
        // Errors surface on the next pass
        let _ = self.ctx.evaluator.evaluate(&source, &frame);
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Queue this binding for the next tick.
    pub fn mark_dirty(&self) {
        if self.torn_down.get() {
            return;
        }
        let target: Weak<dyn FlushTarget> = self.weak_self.clone();
        self.ctx.scheduler.mark_dirty(self.id, target);
    }

    /// Reconcile now, recording this binding's failures and those of every
    /// nested binding into `outcome`.
    pub fn reconcile_into(&self, outcome: &mut FlushOutcome) {
        if self.torn_down.get() {
            return;
        }
        let Ok(mut state) = self.state.try_borrow_mut() else {
            debug!(binding = %self.id, "reentrant reconcile skipped");
            return;
        };

        outcome.reconciled += 1;
        if let Err(error) = state.reconcile(&self.ctx, &self.weak_self, self.id, outcome) {
            outcome.failures.push(BindingFailure {
                binding: self.id,
                source_text: state.spec.directive.text.clone(),
                error,
            });
        }
    }

    /// Reconcile now and return what happened.
    pub fn reconcile(&self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        self.reconcile_into(&mut outcome);
        outcome
    }

    /// Point the binding at a new enclosing frame. Takes effect on the next pass.
    pub fn set_host_frame(&self, frame: LocalsFrame) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.host_frame = frame;
        }
    }

    /// Stop observing, leave the scheduler, and destroy every instance.
    /// Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.ctx.scheduler.forget(self.id);

        let watcher = self.watcher.borrow_mut().take();
        if let Some(stop) = watcher {
            stop();
        }

        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.source = None;
            state.instances.teardown(&self.ctx);
        }
        trace!(binding = %self.id, "binding torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of instances currently rendered.
    pub fn len(&self) -> usize {
        self.state.borrow().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot(&self) -> NodeId {
        self.state.borrow().slot
    }

    /// Passes that got past evaluation and key checks.
    pub fn pass_count(&self) -> u64 {
        self.state.borrow().passes
    }

    /// The list observed by the last pass.
    pub fn source(&self) -> Option<ObservableCollection> {
        self.state
            .borrow()
            .source
            .as_ref()
            .map(|watched| watched.list.clone())
    }

    pub fn instances(&self) -> Vec<InstanceView> {
        self.state
            .borrow()
            .instances
            .iter()
            .map(|instance| InstanceView {
                key: instance.key().to_string(),
                index: instance.index(),
                roots: instance.roots().to_vec(),
                frame: instance.frame().clone(),
            })
            .collect()
    }

    /// Locals bound directly on instance `index` (not its ancestors).
    pub fn own_locals(&self, index: usize) -> Option<Locals> {
        self.state
            .borrow()
            .instances
            .get(index)
            .map(|instance| instance.frame().own_locals().clone())
    }

    /// Bindings nested directly inside instance `index`.
    pub fn children(&self, index: usize) -> Vec<Rc<CollectionBinding>> {
        self.state
            .borrow()
            .instances
            .get(index)
            .map(|instance| instance.children().to_vec())
            .unwrap_or_default()
    }
}

impl FlushTarget for CollectionBinding {
    fn binding_id(&self) -> BindingId {
        self.id
    }

    fn flush(&self, outcome: &mut FlushOutcome) {
        self.reconcile_into(outcome);
    }
}

impl Drop for CollectionBinding {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for CollectionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CollectionBinding");
        s.field("id", &self.id).field("torn_down", &self.torn_down.get());
        if let Ok(state) = self.state.try_borrow() {
            s.field("directive", &state.spec.directive.text)
                .field("instances", &state.instances.len())
                .field("passes", &state.passes);
        }
        s.finish()
    }
}

// =============================================================================
// Pass
// =============================================================================

impl BindingState {
    fn reconcile(
        &mut self,
        ctx: &Rc<RenderContext>,
        binding: &Weak<CollectionBinding>,
        id: BindingId,
        outcome: &mut FlushOutcome,
    ) -> Result<ReconcileStats, ReconcileError> {
        let spec = Rc::clone(&self.spec);
        let directive = &spec.directive;
        let local_name = directive.local_name(&ctx.config.default_local);

        let list = match ctx.evaluator.evaluate(&directive.source, &self.host_frame)? {
            Value::List(list) => Some(list),
            Value::Null if ctx.config.null_as_empty => None,
            other => {
                return Err(ReconcileError::SourceType {
                    expression: directive.source.to_string(),
                    found: other.kind(),
                });
            }
        };

        self.replaced |= self.watch(list, binding);

        let snapshot = self
            .source
            .as_ref()
            .map(|watched| watched.list.snapshot())
            .unwrap_or_default();
        let keys = match &directive.key {
            Some(key) => evaluate_keys(
                ctx.evaluator.as_ref(),
                key,
                &snapshot,
                &self.host_frame,
                local_name,
            )?,
            None => positional_keys(snapshot.len()),
        };

        let replaced = self.replaced;
        let pass = Pass {
            ctx,
            binding: id,
            spec: &spec,
            slot: self.slot,
            host_frame: &self.host_frame,
            local_name,
            snapshot: &snapshot,
            keys: &keys,
            positional: directive.key.is_none() || replaced,
        };
        let stats = self.instances.reconcile(&pass, outcome)?;
        self.replaced = false;
        self.passes += 1;

        debug!(
            binding = %id,
            length = stats.length,
            created = stats.created,
            destroyed = stats.destroyed,
            moved = stats.moved,
            rebuilt = stats.rebuilt,
            replaced,
            "reconciled"
        );
        Ok(stats)
    }

    /// Follow the list handle. Returns whether it replaced one an earlier
    /// pass rendered.
    fn watch(&mut self, list: Option<ObservableCollection>, binding: &Weak<CollectionBinding>) -> bool {
        let unchanged = match (&self.source, &list) {
            (Some(watched), Some(list)) => watched.list.ptr_eq(list),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return false;
        }

        let replaced = self.passes > 0;
        self.source = list.map(|list| {
            let weak = binding.clone();
            let subscription = list.subscribe(move || {
                if let Some(binding) = weak.upgrade() {
                    binding.mark_dirty();
                }
            });
            WatchedSource {
                list,
                _subscription: subscription,
            }
        });
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Directive, HostEvaluator, HostProperties};
    use crate::pipeline::ManualTicks;
    use crate::types::TemplateId;
    use crate::renderer::{element, repeat, TemplateNode};

    struct Fixture {
        ctx: Rc<RenderContext>,
        properties: Rc<HostProperties>,
        ticks: Rc<ManualTicks>,
        root: NodeId,
        binding: Rc<CollectionBinding>,
    }

    fn fixture(node: TemplateNode, items: &[i64], config: EngineConfig) -> Fixture {
        let mut templates = TemplateRegistry::new();
        let root_template = templates.register(&[node]).unwrap();

        let properties = Rc::new(HostProperties::new());
        properties.set("items", Value::list(items.iter().copied()));

        let ticks = Rc::new(ManualTicks::new());
        let ctx = Rc::new(RenderContext::new(
            templates,
            Rc::new(HostEvaluator::new(properties.clone())),
            TickScheduler::new(ticks.clone()),
            config,
        ));

        let (root, fragment) = {
            let mut tree = ctx.tree.borrow_mut();
            let root = tree.create_element("root", &[]);
            let fragment = ctx.templates.instantiate(root_template, &mut tree).unwrap();
            tree.attach(&fragment.roots, root, None);
            (root, fragment)
        };
        let site = fragment.repeats[0].clone();
        let binding = CollectionBinding::create(ctx.clone(), site.spec, site.slot, LocalsFrame::root());
        assert!(binding.reconcile().is_ok());

        Fixture {
            ctx,
            properties,
            ticks,
            root,
            binding,
        }
    }

    fn items_node() -> TemplateNode {
        repeat("items")
            .body([element("div").attr("data-value", "").bind_text("@item")])
            .into()
    }

    fn rendered(fx: &Fixture) -> Vec<String> {
        let tree = fx.ctx.tree.borrow();
        tree.query_attr(fx.root, "data-value")
            .into_iter()
            .map(|id| tree.text_content(id))
            .collect()
    }

    fn list(fx: &Fixture) -> ObservableCollection {
        fx.properties.get("items").and_then(|v| v.as_list().cloned()).unwrap()
    }

    #[test]
    fn test_initial_pass_renders_in_order() {
        let fx = fixture(items_node(), &[4, 2, 3, 1], EngineConfig::default());
        assert_eq!(rendered(&fx), ["4", "2", "3", "1"]);
        assert_eq!(fx.binding.len(), 4);
        assert_eq!(fx.binding.pass_count(), 1);
        assert!(!fx.ctx.scheduler.is_armed(), "initial pass needs no tick");
    }

    #[test]
    fn test_mutation_marks_dirty_until_tick() {
        let fx = fixture(items_node(), &[4, 2, 3, 1], EngineConfig::default());
        list(&fx).pop();
        list(&fx).push(9);

        assert!(fx.ctx.scheduler.is_dirty(fx.binding.id()));
        assert_eq!(rendered(&fx), ["4", "2", "3", "1"], "nothing until the tick");

        fx.ticks.advance();
        assert_eq!(rendered(&fx), ["4", "2", "3", "9"]);
        assert_eq!(fx.binding.pass_count(), 2, "coalesced into one pass");
    }

    #[test]
    fn test_reassignment_resubscribes() {
        let fx = fixture(items_node(), &[4, 2, 3, 1], EngineConfig::default());
        let old = list(&fx);

        fx.properties.set("items", Value::list([2, 2, 1]));
        assert!(fx.ctx.scheduler.is_dirty(fx.binding.id()));
        fx.ticks.advance();
        assert_eq!(rendered(&fx), ["2", "2", "1"]);
        assert_eq!(old.subscriber_count(), 0, "old list released");

        list(&fx).push(7);
        fx.ticks.advance();
        assert_eq!(rendered(&fx), ["2", "2", "1", "7"]);
    }

    #[test]
    fn test_source_type_error_leaves_tree() {
        let fx = fixture(items_node(), &[1, 2], EngineConfig::default());
        fx.properties.set("items", Value::from(5));
        fx.ticks.advance();

        let outcome = fx.ctx.scheduler.take_outcome();
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            ReconcileError::SourceType { found: "int", .. }
        ));
        assert_eq!(rendered(&fx), ["1", "2"]);
    }

    #[test]
    fn test_null_source() {
        let fx = fixture(items_node(), &[1, 2], EngineConfig::default().with_null_as_empty(true));
        fx.properties.set("items", Value::Null);
        fx.ticks.advance();
        assert!(fx.ctx.scheduler.take_outcome().is_ok());
        assert!(rendered(&fx).is_empty());
        assert!(fx.binding.source().is_none());
    }

    #[test]
    fn test_teardown_cancels_pending_flush() {
        let fx = fixture(items_node(), &[1, 2, 3], EngineConfig::default());
        let source = list(&fx);
        source.push(4);
        assert!(fx.ctx.scheduler.is_dirty(fx.binding.id()));

        fx.binding.teardown();
        assert!(!fx.ctx.scheduler.is_dirty(fx.binding.id()));
        assert_eq!(source.subscriber_count(), 0);
        assert!(fx.ctx.tree.borrow().children(fx.binding.slot()).is_empty());

        fx.ticks.advance();
        assert_eq!(fx.binding.pass_count(), 1, "never flushed after teardown");

        fx.properties.set("items", Value::list([1]));
        assert!(!fx.ctx.scheduler.is_dirty(fx.binding.id()), "watcher stopped");
    }

    #[test]
    fn test_failed_pass_still_follows_new_list() {
        let keyed = repeat("items")
            .keyed_by("@item")
            .body([element("div").attr("data-value", "").bind_text("@item")])
            .into();
        let fx = fixture(keyed, &[1, 2, 3], EngineConfig::default());
        let old = list(&fx);

        fx.properties.set("items", Value::list([7, 7, 8]));
        fx.ticks.advance();
        let outcome = fx.ctx.scheduler.take_outcome();
        assert!(matches!(
            outcome.failures[0].error,
            ReconcileError::KeyCollision { first: 0, second: 1, .. }
        ));
        assert_eq!(rendered(&fx), ["1", "2", "3"]);

        let fresh = list(&fx);
        assert_eq!(old.subscriber_count(), 0);
        assert_eq!(fresh.subscriber_count(), 1);

        fresh.shift();
        assert!(fx.ctx.scheduler.is_dirty(fx.binding.id()));
        fx.ticks.advance();
        assert!(fx.ctx.scheduler.take_outcome().is_ok());
        assert_eq!(rendered(&fx), ["7", "8"]);
    }

    #[test]
    fn test_unknown_body_template_fails_pass() {
        let fx = fixture(items_node(), &[1], EngineConfig::default());
        let slot = fx.ctx.tree.borrow_mut().create_element("slot", &[]);
        let spec = Rc::new(RepeatSpec {
            directive: Directive::parse("items").unwrap(),
            body: TemplateId(99),
        });
        let binding = CollectionBinding::create(fx.ctx.clone(), spec, slot, LocalsFrame::root());

        let outcome = binding.reconcile();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].error,
            ReconcileError::UnknownTemplate { template: 99 }
        );
        assert!(binding.is_empty());
        assert_eq!(binding.pass_count(), 0);
    }

    #[test]
    fn test_own_locals() {
        let fx = fixture(items_node(), &[4, 2], EngineConfig::default());
        let locals = fx.binding.own_locals(1).unwrap();
        assert_eq!(locals.get("item"), Some(&Value::from(2)));
        assert_eq!(locals.get("last"), Some(&Value::from(true)));
        assert!(fx.binding.own_locals(2).is_none());
    }
}
