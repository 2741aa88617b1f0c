//! Templates - declarative node descriptions cloned per instance.
//!
//! Templates are written with the builder functions and compiled once into a
//! [`TemplateRegistry`]. Compilation parses every binding string, registers
//! each repeat body as its own template, and fails early on bad syntax.
//!
//! ```ignore
//! use spark_foreach::renderer::{element, repeat, text};
//!
//! let template = vec![
//!     repeat("items").body([
//!         element("div").attr("data-value", "").bind_text("@item").into(),
//!         element("span").child(text("test")).into(),
//!     ]).into(),
//! ];
//! ```
//!
//! Instantiation clones a compiled template into detached nodes and reports
//! the text bindings and repeat sites found inside it as a [`Fragment`].

use std::rc::Rc;

use crate::error::ParseError;
use crate::expression::{Directive, Expression};
use crate::types::{NodeId, TemplateId};

use super::NodeTree;

// =============================================================================
// Builder
// =============================================================================

/// Uncompiled template node.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Element(ElementNode),
    Text(String),
    Repeat(RepeatNode),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Text binding expression.
    pub text: Option<String>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepeatNode {
    /// `[local:] source`
    pub directive: String,
    pub key: Option<String>,
    pub body: Vec<TemplateNode>,
}

pub fn element(tag: &str) -> ElementNode {
    ElementNode {
        tag: tag.to_string(),
        ..Default::default()
    }
}

pub fn text(content: &str) -> TemplateNode {
    TemplateNode::Text(content.to_string())
}

pub fn repeat(directive: &str) -> RepeatNode {
    RepeatNode {
        directive: directive.to_string(),
        ..Default::default()
    }
}

impl ElementNode {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bind_text(mut self, expression: &str) -> Self {
        self.text = Some(expression.to_string());
        self
    }

    pub fn child(mut self, node: impl Into<TemplateNode>) -> Self {
        self.children.push(node.into());
        self
    }
}

impl RepeatNode {
    pub fn keyed_by(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn body<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<TemplateNode>,
    {
        self.body.extend(nodes.into_iter().map(Into::into));
        self
    }
}

impl From<ElementNode> for TemplateNode {
    fn from(node: ElementNode) -> Self {
        TemplateNode::Element(node)
    }
}

impl From<RepeatNode> for TemplateNode {
    fn from(node: RepeatNode) -> Self {
        TemplateNode::Repeat(node)
    }
}

// =============================================================================
// Compiled form
// =============================================================================

/// A compiled repeat site: the directive plus its body template.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatSpec {
    pub directive: Directive,
    pub body: TemplateId,
}

#[derive(Debug)]
enum CompiledNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        text: Option<Rc<Expression>>,
        children: Vec<CompiledNode>,
    },
    Text(String),
    Repeat(Rc<RepeatSpec>),
}

/// A text binding found while instantiating.
#[derive(Debug, Clone)]
pub struct TextBinding {
    pub node: NodeId,
    pub expression: Rc<Expression>,
}

/// A repeat site found while instantiating.
#[derive(Debug, Clone)]
pub struct RepeatSite {
    pub slot: NodeId,
    pub spec: Rc<RepeatSpec>,
}

/// Detached result of instantiating a template.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub roots: Vec<NodeId>,
    pub text_bindings: Vec<TextBinding>,
    /// Repeat sites directly inside this fragment, in document order.
    pub repeats: Vec<RepeatSite>,
}

/// Compiled templates, addressed by [`TemplateId`].
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Vec<CompiledNode>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn contains(&self, id: TemplateId) -> bool {
        id.0 < self.templates.len()
    }

    /// Compile a node list (and every nested repeat body).
    pub fn register(&mut self, nodes: &[TemplateNode]) -> Result<TemplateId, ParseError> {
        let compiled = nodes
            .iter()
            .map(|node| self.compile(node))
            .collect::<Result<Vec<_>, _>>()?;
        self.templates.push(compiled);
        Ok(TemplateId(self.templates.len() - 1))
    }

    fn compile(&mut self, node: &TemplateNode) -> Result<CompiledNode, ParseError> {
        Ok(match node {
            TemplateNode::Element(el) => CompiledNode::Element {
                tag: el.tag.clone(),
                attrs: el.attrs.clone(),
                text: el
                    .text
                    .as_deref()
                    .map(Expression::parse)
                    .transpose()?
                    .map(Rc::new),
                children: el
                    .children
                    .iter()
                    .map(|child| self.compile(child))
                    .collect::<Result<_, _>>()?,
            },
            TemplateNode::Text(content) => CompiledNode::Text(content.clone()),
            TemplateNode::Repeat(rep) => {
                let mut directive = Directive::parse(&rep.directive)?;
                if let Some(key) = &rep.key {
                    directive = directive.keyed_by(key)?;
                }
                let body = self.register(&rep.body)?;
                CompiledNode::Repeat(Rc::new(RepeatSpec { directive, body }))
            }
        })
    }

    /// Clone a template into detached nodes. `None` for an unknown id.
    pub fn instantiate(&self, id: TemplateId, tree: &mut NodeTree) -> Option<Fragment> {
        let nodes = self.templates.get(id.0)?;
        let mut fragment = Fragment::default();
        for node in nodes {
            let root = Self::build(node, tree, &mut fragment);
            fragment.roots.push(root);
        }
        Some(fragment)
    }

    fn build(node: &CompiledNode, tree: &mut NodeTree, fragment: &mut Fragment) -> NodeId {
        match node {
            CompiledNode::Element {
                tag,
                attrs,
                text,
                children,
            } => {
                let id = tree.create_element(tag, attrs);
                if let Some(expression) = text {
                    fragment.text_bindings.push(TextBinding {
                        node: id,
                        expression: expression.clone(),
                    });
                }
                for child in children {
                    let child_id = Self::build(child, tree, fragment);
                    tree.append_child(id, child_id);
                }
                id
            }
            CompiledNode::Text(content) => tree.create_text(content),
            CompiledNode::Repeat(spec) => {
                let slot = tree.create_slot(&spec.directive.text);
                fragment.repeats.push(RepeatSite {
                    slot,
                    spec: spec.clone(),
                });
                slot
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreach_template() -> Vec<TemplateNode> {
        vec![
            repeat("items")
                .body([
                    TemplateNode::from(element("div").attr("data-value", "").bind_text("@item")),
                    element("span").child(text("test")).into(),
                ])
                .into(),
        ]
    }

    #[test]
    fn test_register_compiles_nested_bodies() {
        let mut registry = TemplateRegistry::new();
        let root = registry.register(&foreach_template()).unwrap();
        assert_eq!(registry.len(), 2, "root plus one repeat body");
        assert_eq!(root, TemplateId(1), "body registers before its parent");
    }

    #[test]
    fn test_register_rejects_bad_bindings() {
        let mut registry = TemplateRegistry::new();
        let bad = vec![element("div").bind_text("@").into()];
        assert!(registry.register(&bad).is_err());

        let bad = vec![repeat("1x: items").into()];
        assert!(registry.register(&bad).is_err());
    }

    #[test]
    fn test_instantiate_reports_sites() {
        let mut registry = TemplateRegistry::new();
        let root = registry.register(&foreach_template()).unwrap();
        let mut tree = NodeTree::new();

        let fragment = registry.instantiate(root, &mut tree).unwrap();
        assert_eq!(fragment.roots.len(), 1);
        assert_eq!(fragment.repeats.len(), 1);
        assert!(fragment.text_bindings.is_empty(), "body is not expanded");
        assert_eq!(fragment.repeats[0].slot, fragment.roots[0]);

        let body = registry
            .instantiate(fragment.repeats[0].spec.body, &mut tree)
            .unwrap();
        assert_eq!(body.roots.len(), 2);
        assert_eq!(body.text_bindings.len(), 1);
        assert_eq!(tree.text_content(body.roots[1]), "test");
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::new();
        let mut tree = NodeTree::new();
        assert!(registry.instantiate(TemplateId(7), &mut tree).is_none());
    }
}
