//! Node Tree - the rendered output as an arena of nodes.
//!
//! Nodes are indices into one arena, with a free pool so released indices are
//! reused:
//!
//! ```text
//! 0: Element root     children [1]
//! 1: Slot   items     children [2, 4]     ← one repeat site
//! 2: Element div      text "4"            ← instance 0
//! 4: Element div      text "2"            ← instance 1
//! ```
//!
//! A repeat site renders as a [`NodeKind::Slot`] whose children are exactly
//! the rendered roots of its instances, in instance order. Instances attach
//! into the slot, before the first root of the following instance (or at the
//! end).
//!
//! This is the attachment service the reconciler drives: [`attach`],
//! [`detach`] and [`move_before`].
//!
//! [`attach`]: NodeTree::attach
//! [`detach`]: NodeTree::detach
//! [`move_before`]: NodeTree::move_before

use std::fmt::Write as _;

use crate::types::NodeId;

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String },
    Text,
    /// Container holding the instances of one repeat site.
    Slot { label: String },
}

/// One node of the rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Arena of rendered nodes.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    fn allocate(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            NodeId(index)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    pub fn create_element(&mut self, tag: &str, attrs: &[(String, String)]) -> NodeId {
        let mut node = Node::new(NodeKind::Element {
            tag: tag.to_string(),
        });
        node.attrs = attrs.to_vec();
        self.allocate(node)
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        let mut node = Node::new(NodeKind::Text);
        node.text = text.to_string();
        self.allocate(node)
    }

    pub fn create_slot(&mut self, label: &str) -> NodeId {
        self.allocate(Node::new(NodeKind::Slot {
            label: label.to_string(),
        }))
    }

    /// Release a node and its whole subtree. Does not unlink from the parent.
    fn release(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        for child in node.children {
            self.release(child);
        }
        self.free.push(id.0);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        out.push_str(&node.text);
        for child in &node.children {
            self.collect_text(*child, out);
        }
    }

    /// Nodes under `root` (inclusive) carrying `attr`, in document order.
    pub fn query_attr(&self, root: NodeId, attr: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(root, &mut |id, node| {
            if node.attr(attr).is_some() {
                out.push(id);
            }
        });
        out
    }

    fn walk(&self, id: NodeId, visit: &mut dyn FnMut(NodeId, &Node)) {
        let Some(node) = self.get(id) else { return };
        visit(id, node);
        for child in &node.children {
            self.walk(*child, visit);
        }
    }

    /// Indented dump of a subtree, for diagnostics and snapshot tests.
    pub fn outline(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.outline_into(root, 0, &mut out);
        out
    }

    fn outline_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        let indent = "  ".repeat(depth);
        let _ = match &node.kind {
            NodeKind::Element { tag } => writeln!(out, "{indent}<{tag}> {}", node.text),
            NodeKind::Text => writeln!(out, "{indent}\"{}\"", node.text),
            NodeKind::Slot { label } => writeln!(out, "{indent}[{label}]"),
        };
        for child in &node.children {
            self.outline_into(*child, depth + 1, out);
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::as_mut) {
            if node.text != text {
                node.text = text.to_string();
            }
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.attach(&[child], parent, None);
    }

    /// Attach detached roots under `parent`, before `before` (or at the end).
    pub fn attach(&mut self, roots: &[NodeId], parent: NodeId, before: Option<NodeId>) {
        for root in roots {
            self.unlink(*root);
        }
        let Some(parent_node) = self.nodes.get_mut(parent.0).and_then(Option::as_mut) else {
            return;
        };
        let at = before
            .and_then(|b| parent_node.children.iter().position(|c| *c == b))
            .unwrap_or(parent_node.children.len());
        parent_node
            .children
            .splice(at..at, roots.iter().copied());
        for root in roots {
            if let Some(node) = self.nodes.get_mut(root.0).and_then(Option::as_mut) {
                node.parent = Some(parent);
            }
        }
    }

    /// Move attached roots so they sit before `before` under their current
    /// parent (or at the end).
    pub fn move_before(&mut self, roots: &[NodeId], before: Option<NodeId>) {
        let Some(parent) = roots.first().and_then(|r| self.parent(*r)) else {
            return;
        };
        self.attach(roots, parent, before);
    }

    /// Unlink roots from their parent and release their subtrees.
    pub fn detach(&mut self, roots: &[NodeId]) {
        for root in roots {
            self.unlink(*root);
            self.release(*root);
        }
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else { return };
        if let Some(parent_node) = self.nodes.get_mut(parent.0).and_then(Option::as_mut) {
            parent_node.children.retain(|c| *c != id);
        }
        if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::as_mut) {
            node.parent = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_value(tree: &mut NodeTree, text: &str) -> NodeId {
        let id = tree.create_element("div", &[("data-value".into(), String::new())]);
        tree.set_text(id, text);
        id
    }

    #[test]
    fn test_attach_before_anchor() {
        let mut tree = NodeTree::new();
        let slot = tree.create_slot("items");
        let a = data_value(&mut tree, "a");
        let c = data_value(&mut tree, "c");
        let b = data_value(&mut tree, "b");

        tree.attach(&[a, c], slot, None);
        tree.attach(&[b], slot, Some(c));

        assert_eq!(tree.children(slot), &[a, b, c]);
        assert_eq!(tree.parent(b), Some(slot));
        assert_eq!(tree.text_content(slot), "abc");
    }

    #[test]
    fn test_move_before_reorders() {
        let mut tree = NodeTree::new();
        let slot = tree.create_slot("items");
        let a = data_value(&mut tree, "a");
        let b = data_value(&mut tree, "b");
        let c = data_value(&mut tree, "c");
        tree.attach(&[a, b, c], slot, None);

        tree.move_before(&[c], Some(a));
        assert_eq!(tree.children(slot), &[c, a, b]);

        tree.move_before(&[c], None);
        assert_eq!(tree.children(slot), &[a, b, c]);
    }

    #[test]
    fn test_detach_releases_subtree_and_reuses_ids() {
        let mut tree = NodeTree::new();
        let root = tree.create_element("root", &[]);
        let div = tree.create_element("div", &[]);
        let text = tree.create_text("x");
        tree.append_child(div, text);
        tree.append_child(root, div);
        assert_eq!(tree.len(), 3);

        tree.detach(&[div]);
        assert_eq!(tree.len(), 1);
        assert!(tree.children(root).is_empty());
        assert!(!tree.contains(text));

        let reused = tree.create_text("y");
        assert!(reused == div || reused == text, "freed index is reused");
    }

    #[test]
    fn test_query_attr_in_document_order() {
        let mut tree = NodeTree::new();
        let root = tree.create_element("root", &[]);
        let outer = tree.create_slot("outer");
        tree.append_child(root, outer);
        let one = data_value(&mut tree, "1");
        let two = data_value(&mut tree, "2");
        let plain = tree.create_text("asd");
        tree.attach(&[one, plain, two], outer, None);

        assert_eq!(tree.query_attr(root, "data-value"), vec![one, two]);
    }

    #[test]
    fn test_outline() {
        let mut tree = NodeTree::new();
        let root = tree.create_element("root", &[]);
        let slot = tree.create_slot("items");
        tree.append_child(root, slot);
        let a = data_value(&mut tree, "4");
        tree.append_child(slot, a);

        assert_eq!(tree.outline(root), "<root> \n  [items]\n    <div> 4\n");
    }
}
