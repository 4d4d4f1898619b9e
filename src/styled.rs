//! Formatted engine output.
//!
//! A [`StyledText`] is a list of inline nodes (`i`, `b`, `sup`, plain text)
//! as a citation engine produced them. Its plain text is the concatenated text
//! of those nodes, and unformatted text can be inserted at any byte offset of
//! it.

use crate::tree::{Element, Node};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyledText {
    nodes: Vec<Node>,
}

impl StyledText {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: merge_text(nodes),
        }
    }

    /// Unformatted text.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(vec![Node::text(text)])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// The plain text.
    pub fn text(&self) -> String {
        self.nodes.iter().map(Node::text_content).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_empty()
    }

    /// Inserts unformatted `text` at byte `offset` of the plain text. A
    /// formatting element spanning the offset is split in two around it.
    pub fn insert(&mut self, offset: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        let (mut left, right) = split_nodes(std::mem::take(&mut self.nodes), offset);
        left.push(Node::text(text));
        left.extend(right);
        self.nodes = merge_text(left);
    }

    /// Puts `open` before and `close` after the whole text.
    pub fn wrap(&mut self, open: &str, close: &str) {
        self.insert(0, open);
        let end = self.text().len();
        self.insert(end, close);
    }
}

fn split_nodes(nodes: Vec<Node>, offset: usize) -> (Vec<Node>, Vec<Node>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut position = 0;

    for node in nodes {
        let len = node.text_content().len();
        if position + len <= offset {
            left.push(node);
        } else if position >= offset {
            right.push(node);
        } else {
            let at = offset - position;
            match node {
                Node::Text { value } if value.is_char_boundary(at) => {
                    let (head, tail) = value.split_at(at);
                    left.push(Node::text(head));
                    right.push(Node::text(tail));
                }
                Node::Text { value } => left.push(Node::Text { value }),
                Node::Element(element) => {
                    let Element {
                        tag,
                        attributes,
                        children,
                    } = element;
                    let (head, tail) = split_nodes(children, at);
                    left.push(
                        Element {
                            tag: tag.clone(),
                            attributes: attributes.clone(),
                            children: head,
                        }
                        .into(),
                    );
                    right.push(
                        Element {
                            tag,
                            attributes,
                            children: tail,
                        }
                        .into(),
                    );
                }
            }
        }
        position += len;
    }

    (left, right)
}

/// Joins adjacent text nodes and drops empty ones.
fn merge_text(nodes: Vec<Node>) -> Vec<Node> {
    let mut merged: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Text { value } if value.is_empty() => {}
            Node::Text { value } => match merged.last_mut() {
                Some(Node::Text { value: previous }) => previous.push_str(&value),
                _ => merged.push(Node::Text { value }),
            },
            element => merged.push(element),
        }
    }
    merged
}
