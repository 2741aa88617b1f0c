//! Instance Tree - ownership of the rendered instances of one binding.
//!
//! Every [`ItemInstance`] is owned by exactly one [`InstanceTree`], which is
//! owned by exactly one [`CollectionBinding`]. Destroying an instance tears
//! down the bindings nested inside it before its nodes are detached, so no
//! instance or nested binding outlives its parent.
//!
//! # Pass
//!
//! 1. Structural adjustment: grow/shrink the tail (positional) or follow a
//!    [`KeyedPlan`](super::KeyedPlan) (keyed)
//! 2. Rebind: derive each instance's locals; rebuild its frame only when they
//!    changed, refresh text bindings, then reconcile nested bindings inline
//!    against the instance frame

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::engine::{FlushOutcome, LocalsFrame};
use crate::error::{BindingFailure, ReconcileError};
use crate::renderer::{RepeatSite, RepeatSpec, TextBinding};
use crate::types::{BindingId, LocalChanges, NodeId, Value};

use super::foreach::{CollectionBinding, RenderContext};
use super::reconcile::{plan_keyed, ItemLocals};

// =============================================================================
// ItemInstance
// =============================================================================

/// The rendered subtree and locals for one element.
pub struct ItemInstance {
    key: String,
    index: usize,
    roots: Vec<NodeId>,
    frame: LocalsFrame,
    /// Locals of the last rebind; `None` until the first one.
    locals: Option<ItemLocals>,
    text_bindings: Vec<TextBinding>,
    /// Repeat sites waiting for the instance's first frame.
    pending_sites: Vec<RepeatSite>,
    children: Vec<Rc<CollectionBinding>>,
}

impl ItemInstance {
    /// Clone the body template into detached nodes.
    fn create(
        ctx: &RenderContext,
        spec: &RepeatSpec,
        key: String,
        index: usize,
    ) -> Result<Self, ReconcileError> {
        let fragment = ctx
            .templates
            .instantiate(spec.body, &mut ctx.tree.borrow_mut())
            .ok_or(ReconcileError::UnknownTemplate {
                template: spec.body.0,
            })?;
        trace!(key = %key, roots = fragment.roots.len(), "instance created");
        Ok(Self {
            key,
            index,
            roots: fragment.roots,
            frame: LocalsFrame::root(),
            locals: None,
            text_bindings: fragment.text_bindings,
            pending_sites: fragment.repeats,
            children: Vec::new(),
        })
    }

    /// Tear down nested bindings, then detach and release the nodes.
    fn destroy(self, ctx: &RenderContext) {
        for child in &self.children {
            child.teardown();
        }
        ctx.tree.borrow_mut().detach(&self.roots);
        trace!(key = %self.key, "instance destroyed");
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn frame(&self) -> &LocalsFrame {
        &self.frame
    }

    pub fn children(&self) -> &[Rc<CollectionBinding>] {
        &self.children
    }
}

impl fmt::Debug for ItemInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemInstance")
            .field("key", &self.key)
            .field("index", &self.index)
            .field("roots", &self.roots)
            .field("children", &self.children.len())
            .finish()
    }
}

// =============================================================================
// InstanceTree
// =============================================================================

/// Inputs of one reconciliation pass.
pub(crate) struct Pass<'a> {
    pub ctx: &'a Rc<RenderContext>,
    pub binding: BindingId,
    pub spec: &'a RepeatSpec,
    pub slot: NodeId,
    pub host_frame: &'a LocalsFrame,
    pub local_name: &'a str,
    pub snapshot: &'a [Value],
    pub keys: &'a [String],
    /// Reuse by position only (no key expression, or the source was replaced).
    pub positional: bool,
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub length: usize,
    pub created: usize,
    pub destroyed: usize,
    pub moved: usize,
    /// Instances whose frame object was replaced.
    pub rebuilt: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Placement {
    Stable,
    Moved,
    Created,
}

/// Ordered instances of one binding.
#[derive(Default)]
pub struct InstanceTree {
    instances: Vec<ItemInstance>,
}

impl InstanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ItemInstance> {
        self.instances.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemInstance> {
        self.instances.iter()
    }

    /// Fails only before the first structural change.
    pub(crate) fn reconcile(
        &mut self,
        pass: &Pass<'_>,
        outcome: &mut FlushOutcome,
    ) -> Result<ReconcileStats, ReconcileError> {
        if !pass.ctx.templates.contains(pass.spec.body) {
            return Err(ReconcileError::UnknownTemplate {
                template: pass.spec.body.0,
            });
        }

        let mut stats = ReconcileStats {
            length: pass.snapshot.len(),
            ..Default::default()
        };

        if pass.positional {
            self.adjust_positional(pass, &mut stats)?;
        } else {
            self.adjust_keyed(pass, &mut stats)?;
        }
        self.rebind(pass, outcome, &mut stats);
        Ok(stats)
    }

    /// Destroy every instance.
    pub fn teardown(&mut self, ctx: &RenderContext) {
        for instance in self.instances.drain(..).rev() {
            instance.destroy(ctx);
        }
    }

    fn adjust_positional(
        &mut self,
        pass: &Pass<'_>,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        let n = pass.snapshot.len();

        if self.instances.len() > n {
            let removed: Vec<ItemInstance> = self.instances.drain(n..).collect();
            stats.destroyed = removed.len();
            for instance in removed.into_iter().rev() {
                instance.destroy(pass.ctx);
            }
        }

        for i in self.instances.len()..n {
            let instance = ItemInstance::create(pass.ctx, pass.spec, pass.keys[i].clone(), i)?;
            pass.ctx
                .tree
                .borrow_mut()
                .attach(&instance.roots, pass.slot, None);
            self.instances.push(instance);
            stats.created += 1;
        }
        Ok(())
    }

    fn adjust_keyed(
        &mut self,
        pass: &Pass<'_>,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        let old_keys: Vec<String> = self.instances.iter().map(|i| i.key.clone()).collect();
        let plan = plan_keyed(&old_keys, pass.keys);

        let mut old: Vec<Option<ItemInstance>> =
            std::mem::take(&mut self.instances).into_iter().map(Some).collect();

        for &position in plan.removed.iter().rev() {
            if let Some(instance) = old[position].take() {
                instance.destroy(pass.ctx);
                stats.destroyed += 1;
            }
        }

        let mut next = Vec::with_capacity(pass.keys.len());
        let mut placements = Vec::with_capacity(pass.keys.len());
        for (i, source) in plan.sources.iter().enumerate() {
            match source.and_then(|s| old[s].take()) {
                Some(instance) => {
                    next.push(instance);
                    placements.push(if plan.stable[i] {
                        Placement::Stable
                    } else {
                        Placement::Moved
                    });
                }
                None => {
                    next.push(ItemInstance::create(pass.ctx, pass.spec, pass.keys[i].clone(), i)?);
                    placements.push(Placement::Created);
                }
            }
        }

        // Place back to front so every anchor is already in its final spot
        let mut tree = pass.ctx.tree.borrow_mut();
        let mut anchor: Option<NodeId> = None;
        for (instance, placement) in next.iter().zip(&placements).rev() {
            match placement {
                Placement::Stable => {}
                Placement::Moved => {
                    tree.attach(&instance.roots, pass.slot, anchor);
                    stats.moved += 1;
                    trace!(key = %instance.key, "instance moved");
                }
                Placement::Created => {
                    tree.attach(&instance.roots, pass.slot, anchor);
                    stats.created += 1;
                }
            }
            if let Some(first) = instance.roots.first() {
                anchor = Some(*first);
            }
        }

        self.instances = next;
        Ok(())
    }

    fn rebind(&mut self, pass: &Pass<'_>, outcome: &mut FlushOutcome, stats: &mut ReconcileStats) {
        let length = pass.snapshot.len();
        let force = pass.ctx.config.rebuild_all_frames;

        for (i, instance) in self.instances.iter_mut().enumerate() {
            let locals = ItemLocals {
                item: pass.snapshot[i].clone(),
                index: i,
                length,
                key: pass.keys[i].clone(),
            };

            let mut changes = match &instance.locals {
                Some(previous) => locals.changes(previous),
                None => LocalChanges::CREATED,
            };
            let same_scope = instance
                .frame
                .parent()
                .is_some_and(|parent| parent.ptr_eq(pass.host_frame));
            if !same_scope {
                changes |= LocalChanges::SCOPE;
            }

            if force || !changes.is_empty() {
                instance.frame = pass.host_frame.child(locals.to_locals(pass.local_name));
                stats.rebuilt += 1;
            }
            instance.key = locals.key.clone();
            instance.index = i;
            instance.locals = Some(locals);

            refresh_text(pass, instance, outcome);

            // Nested directives need the instance frame before they can exist
            for site in std::mem::take(&mut instance.pending_sites) {
                instance.children.push(CollectionBinding::create(
                    Rc::clone(pass.ctx),
                    site.spec,
                    site.slot,
                    instance.frame.clone(),
                ));
            }

            for child in &instance.children {
                child.set_host_frame(instance.frame.clone());
                child.reconcile_into(outcome);
            }
        }
    }
}

fn refresh_text(pass: &Pass<'_>, instance: &ItemInstance, outcome: &mut FlushOutcome) {
    for binding in &instance.text_bindings {
        match pass.ctx.evaluator.evaluate(&binding.expression, &instance.frame) {
            Ok(value) => pass
                .ctx
                .tree
                .borrow_mut()
                .set_text(binding.node, &value.to_string()),
            Err(error) => outcome.failures.push(BindingFailure {
                binding: pass.binding,
                source_text: binding.expression.to_string(),
                error: ReconcileError::from(error),
            }),
        }
    }
}

impl fmt::Debug for InstanceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.instances.iter()).finish()
    }
}
