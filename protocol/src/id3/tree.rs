//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::id3::Row;

/// A node of the learned classification tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Id3Node {
    Leaf {
        class: String,
    },
    /// Children follow the value order of the split attribute
    Internal {
        attribute: String,
        children: Vec<(String, Id3Node)>,
    },
}

impl Id3Node {
    pub fn leaf<S: Into<String>>(class: S) -> Id3Node {
        Id3Node::Leaf {
            class: class.into(),
        }
    }

    pub fn internal<S: Into<String>>(attribute: S, children: Vec<(String, Id3Node)>) -> Id3Node {
        Id3Node::Internal {
            attribute: attribute.into(),
            children,
        }
    }

    /// Class for a leaf, split attribute otherwise
    pub fn label(&self) -> &str {
        match self {
            Id3Node::Leaf { class } => class,
            Id3Node::Internal { attribute, .. } => attribute,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Id3Node::Leaf { .. })
    }

    pub fn children(&self) -> &[(String, Id3Node)] {
        match self {
            Id3Node::Leaf { .. } => &[],
            Id3Node::Internal { children, .. } => children.as_slice(),
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &str> {
        self.children().iter().map(|(v, _)| v.as_str())
    }

    pub fn child(&self, value: &str) -> Option<&Id3Node> {
        self.children()
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, n)| n)
    }

    /// Number of splits on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        self.children()
            .iter()
            .map(|(_, n)| 1 + n.depth())
            .max()
            .unwrap_or(0)
    }

    pub fn leaves(&self) -> usize {
        match self {
            Id3Node::Leaf { .. } => 1,
            Id3Node::Internal { children, .. } => children.iter().map(|(_, n)| n.leaves()).sum(),
        }
    }

    /// Walks the tree with the row's values. `None` when the row lacks a
    /// split attribute or carries a value the tree has no edge for.
    pub fn classify(&self, row: &Row) -> Option<&str> {
        let mut node = self;
        loop {
            match node {
                Id3Node::Leaf { class } => return Some(class.as_str()),
                Id3Node::Internal { attribute, .. } => {
                    node = node.child(row.get(attribute)?)?;
                }
            }
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Id3Node::Leaf { class } => writeln!(f, "{:indent$}-> {}", "", class, indent = indent),
            Id3Node::Internal {
                attribute,
                children,
            } => {
                for (value, child) in children {
                    if child.is_leaf() {
                        write!(f, "{:indent$}{} = {} ", "", attribute, value, indent = indent)?;
                        child.render(f, 0)?;
                    } else {
                        writeln!(f, "{:indent$}{} = {}", "", attribute, value, indent = indent)?;
                        child.render(f, indent + 2)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Id3Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}
