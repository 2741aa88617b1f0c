//! Mount API - component lifecycle and tick-driven updates.
//!
//! Mounting compiles a component's template, renders it once synchronously,
//! and returns a [`Surface`] that owns every binding the template created.
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use spark_foreach::pipeline::{mount, Component, ManualTicks};
//! use spark_foreach::renderer::{element, repeat};
//! use spark_foreach::{EngineConfig, Value};
//!
//! let component = Component::new("list")
//!     .property("items", Value::list([4, 2, 3, 1]))
//!     .template([repeat("items")
//!         .body([element("div").attr("data-value", "").bind_text("@item")])
//!         .into()]);
//!
//! let surface = mount(component, EngineConfig::default(), Rc::new(ManualTicks::new()))?;
//! assert_eq!(surface.values(), vec![4, 2, 3, 1]);
//!
//! surface.list("items").unwrap().pop();
//! surface.tick();
//! assert_eq!(surface.values(), vec![4, 2, 3]);
//!
//! surface.unmount();
//! ```
//!
//! # Lifecycle
//!
//! 1. Validate the [`EngineConfig`] and compile the template
//! 2. Render the root template under a root element named after the component
//! 3. Bind every top-level repeat site to the root frame and reconcile it; what
//!    that pass did is kept apart as [`Surface::mount_outcome`]
//! 4. From then on, mutations mark bindings dirty and the tick source flushes
//!    ([`Surface::tick`] with [`ManualTicks`], the host's own loop otherwise)
//!
//! Unmounting (or dropping the surface) tears every binding down, so pending
//! flushes never run against a dead surface.

use std::cell::Ref;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{FlushOutcome, LocalsFrame, ObservableCollection, TickScheduler};
use crate::error::{BindingFailure, MountError, ReconcileError};
use crate::expression::{HostEvaluator, HostProperties};
use crate::primitives::{CollectionBinding, RenderContext};
use crate::renderer::{NodeTree, TemplateNode, TemplateRegistry};
use crate::types::{NodeId, Value};

use super::{ManualTicks, TickSource};

/// Attribute marking nodes whose text is read back by [`Surface::values`].
pub const VALUE_ATTR: &str = "data-value";

// =============================================================================
// Component
// =============================================================================

/// A named template plus the host properties it reads.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub name: String,
    pub properties: Vec<(String, Value)>,
    pub template: Vec<TemplateNode>,
}

impl Component {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.push((name.to_string(), value.into()));
        self
    }

    pub fn template<I>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = TemplateNode>,
    {
        self.template.extend(nodes);
        self
    }
}

// =============================================================================
// Mount
// =============================================================================

/// Mount a component and render it.
///
/// The initial render happens before this returns and needs no tick. Binding
/// failures during it do not fail the mount: they are reported by
/// [`Surface::mount_outcome`], never by a later tick.
///
/// `ticks` is the host's "before next render" primitive. Pass a
/// [`ManualTicks`] to drive updates through [`Surface::tick`].
pub fn mount<T>(
    component: Component,
    config: EngineConfig,
    ticks: Rc<T>,
) -> Result<Surface<T>, MountError>
where
    T: TickSource + 'static,
{
    config.validate()?;
    if component.template.is_empty() {
        return Err(MountError::EmptyTemplate {
            component: component.name,
        });
    }

    let mut templates = TemplateRegistry::new();
    let root_template = match templates.register(&component.template) {
        Ok(id) => id,
        Err(source) => {
            return Err(MountError::Template {
                component: component.name,
                source,
            });
        }
    };

    let properties = Rc::new(HostProperties::from_pairs(component.properties));
    let scheduler = TickScheduler::new(ticks.clone());
    let ctx = Rc::new(RenderContext::new(
        templates,
        Rc::new(HostEvaluator::new(properties.clone())),
        scheduler,
        config,
    ));

    let instantiated = {
        let mut tree = ctx.tree.borrow_mut();
        let root = tree.create_element(&component.name, &[]);
        ctx.templates
            .instantiate(root_template, &mut tree)
            .map(|fragment| {
                tree.attach(&fragment.roots, root, None);
                (root, fragment)
            })
    };
    let Some((root, fragment)) = instantiated else {
        return Err(MountError::Instantiate {
            component: component.name,
        });
    };

    let frame = LocalsFrame::root();
    let mut outcome = FlushOutcome::default();

    if !fragment.text_bindings.is_empty() {
        let root_id = ctx.scheduler.allocate_id();
        for binding in &fragment.text_bindings {
            match ctx.evaluator.evaluate(&binding.expression, &frame) {
                Ok(value) => ctx.tree.borrow_mut().set_text(binding.node, &value.to_string()),
                Err(error) => outcome.failures.push(BindingFailure {
                    binding: root_id,
                    source_text: binding.expression.to_string(),
                    error: ReconcileError::from(error),
                }),
            }
        }
    }

    let bindings: Vec<Rc<CollectionBinding>> = fragment
        .repeats
        .into_iter()
        .map(|site| CollectionBinding::create(ctx.clone(), site.spec, site.slot, frame.clone()))
        .collect();
    for binding in &bindings {
        binding.reconcile_into(&mut outcome);
    }

    debug!(
        component = %component.name,
        bindings = bindings.len(),
        reconciled = outcome.reconciled,
        failures = outcome.failures.len(),
        "mounted"
    );

    Ok(Surface {
        name: component.name,
        ctx,
        properties,
        ticks,
        root,
        bindings,
        mount_outcome: outcome,
        mounted: true,
    })
}

// =============================================================================
// Surface
// =============================================================================

/// A mounted component, updated through the tick source `T`.
pub struct Surface<T = ManualTicks> {
    name: String,
    ctx: Rc<RenderContext>,
    properties: Rc<HostProperties>,
    ticks: Rc<T>,
    root: NodeId,
    bindings: Vec<Rc<CollectionBinding>>,
    mount_outcome: FlushOutcome,
    mounted: bool,
}

impl Surface<ManualTicks> {
    /// Fire one tick and return everything flushed since the last report.
    pub fn tick(&self) -> FlushOutcome {
        self.ticks.advance();
        self.ctx.scheduler.take_outcome()
    }
}

impl<T> Surface<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the synchronous initial render did.
    pub fn mount_outcome(&self) -> &FlushOutcome {
        &self.mount_outcome
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Flush dirty bindings now, without waiting for the tick.
    pub fn flush(&self) -> FlushOutcome {
        self.ctx.scheduler.flush();
        self.ctx.scheduler.take_outcome()
    }

    /// Reconcile every top-level binding (and, inline, every nested one)
    /// whether dirty or not.
    pub fn reconcile_all(&self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        for binding in &self.bindings {
            binding.reconcile_into(&mut outcome);
        }
        outcome
    }

    /// Flush outcomes not yet reported by [`Surface::tick`] or
    /// [`flush`](Self::flush).
    pub fn take_outcome(&self) -> FlushOutcome {
        self.ctx.scheduler.take_outcome()
    }

    // =========================================================================
    // Host properties
    // =========================================================================

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name)
    }

    /// Reassign a host property. Bindings whose source reads it are marked
    /// dirty.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) {
        self.properties.set(name, value.into());
    }

    /// The list currently held by a host property.
    pub fn list(&self, name: &str) -> Option<ObservableCollection> {
        self.property(name)
            .and_then(|value| value.as_list().cloned())
    }

    // =========================================================================
    // Rendered output
    // =========================================================================

    /// Text of every `data-value` node, in document order.
    pub fn texts(&self) -> Vec<String> {
        let tree = self.ctx.tree.borrow();
        tree.query_attr(self.root, VALUE_ATTR)
            .into_iter()
            .map(|id| tree.text_content(id))
            .collect()
    }

    /// [`texts`](Self::texts) parsed as integers; non-integers are skipped.
    pub fn values(&self) -> Vec<i64> {
        self.texts()
            .iter()
            .filter_map(|text| text.trim().parse().ok())
            .collect()
    }

    pub fn outline(&self) -> String {
        self.ctx.tree.borrow().outline(self.root)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> Ref<'_, NodeTree> {
        self.ctx.tree.borrow()
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// The `n`th top-level binding, in template order.
    pub fn binding(&self, n: usize) -> Option<&Rc<CollectionBinding>> {
        self.bindings.get(n)
    }

    pub fn bindings(&self) -> &[Rc<CollectionBinding>] {
        &self.bindings
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.ctx.scheduler
    }

    pub fn ticks(&self) -> &Rc<T> {
        &self.ticks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Tear down every binding and release the rendered tree.
    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;

        for binding in self.bindings.drain(..) {
            binding.teardown();
        }
        self.ctx.tree.borrow_mut().detach(&[self.root]);
        debug!(component = %self.name, "unmounted");
    }
}

impl<T> Drop for Surface<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<T> fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("name", &self.name)
            .field("bindings", &self.bindings.len())
            .field("mounted", &self.mounted)
            .field("scheduler", &self.ctx.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TickCallback;
    use crate::renderer::{element, repeat, text};
    use std::cell::RefCell;

    fn list_component(items: &[i64]) -> Component {
        Component::new("list")
            .property("items", Value::list(items.iter().copied()))
            .template([repeat("items")
                .body([element("div").attr(VALUE_ATTR, "").bind_text("@item")])
                .into()])
    }

    fn mount_default(component: Component) -> Surface {
        mount(component, EngineConfig::default(), Rc::new(ManualTicks::new())).unwrap()
    }

    #[test]
    fn test_mount_renders_synchronously() {
        let surface = mount_default(list_component(&[4, 2, 3, 1]));
        assert_eq!(surface.values(), vec![4, 2, 3, 1]);
        assert_eq!(surface.ticks().pending(), 0);

        let outcome = surface.mount_outcome();
        assert!(outcome.is_ok());
        assert_eq!(outcome.reconciled, 1);
        assert_eq!(surface.take_outcome(), FlushOutcome::default());
    }

    #[test]
    fn test_mount_rejects_bad_input() {
        let err = mount(
            Component::new("empty"),
            EngineConfig::default(),
            Rc::new(ManualTicks::new()),
        )
        .unwrap_err();
        assert!(matches!(err, MountError::EmptyTemplate { .. }));

        let err = mount(
            list_component(&[1]),
            EngineConfig::default().with_default_local("1st"),
            Rc::new(ManualTicks::new()),
        )
        .unwrap_err();
        assert!(matches!(err, MountError::Config(_)));

        let broken = Component::new("broken").template([element("div").bind_text("@").into()]);
        let err = mount(broken, EngineConfig::default(), Rc::new(ManualTicks::new())).unwrap_err();
        assert!(matches!(err, MountError::Template { .. }));
    }

    #[test]
    fn test_root_text_bindings() {
        let component = Component::new("title")
            .property("title", "hello")
            .template([element("h1").attr(VALUE_ATTR, "").bind_text("title").into()]);
        let surface = mount_default(component);
        assert_eq!(surface.texts(), vec!["hello".to_string()]);
        assert!(surface.bindings().is_empty());
    }

    #[test]
    fn test_initial_failure_reported_not_fatal() {
        let component = Component::new("bad")
            .property("items", 3)
            .template([repeat("items").body([text("x")]).into()]);
        let surface = mount_default(component);

        let outcome = surface.mount_outcome();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_text, "items");
        assert!(surface.tick().is_ok(), "not reported again");
    }

    #[test]
    fn test_tick_flushes_and_reports() {
        let surface = mount_default(list_component(&[4, 2, 3, 1]));

        surface.list("items").unwrap().shift();
        assert_eq!(surface.ticks().pending(), 1);

        let outcome = surface.tick();
        assert_eq!(outcome.reconciled, 1);
        assert_eq!(surface.values(), vec![2, 3, 1]);
    }

    #[test]
    fn test_host_tick_source() {
        #[derive(Default)]
        struct HostFrames {
            queue: RefCell<Vec<TickCallback>>,
        }

        impl TickSource for HostFrames {
            fn schedule(&self, callback: TickCallback) {
                self.queue.borrow_mut().push(callback);
            }
        }

        let frames = Rc::new(HostFrames::default());
        let surface = mount(list_component(&[1, 2]), EngineConfig::default(), frames.clone()).unwrap();

        surface.list("items").unwrap().push(3);
        assert_eq!(frames.queue.borrow().len(), 1);
        assert_eq!(surface.values(), vec![1, 2]);

        let due: Vec<TickCallback> = frames.queue.borrow_mut().drain(..).collect();
        for callback in due {
            callback();
        }
        assert_eq!(surface.values(), vec![1, 2, 3]);
        assert_eq!(surface.take_outcome().reconciled, 1);
    }

    #[test]
    fn test_unmount_releases_everything() {
        let surface = mount_default(list_component(&[1, 2, 3]));
        let items = surface.list("items").unwrap();
        let binding = surface.binding(0).unwrap().clone();
        let ticks = surface.ticks().clone();

        items.push(4);
        surface.unmount();

        assert!(binding.is_torn_down());
        assert_eq!(items.subscriber_count(), 0);
        ticks.advance();
        assert_eq!(binding.pass_count(), 1);
    }
}
