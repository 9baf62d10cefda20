//! Shared builders for unit tests

use std::path::PathBuf;

use crate::model::{Edge, EdgeKind, Node, NodeKind};

/// A function node with predictable content.
pub fn func(fqn: &str, path: &str) -> Node {
    let name = fqn.rsplit("::").next().unwrap_or(fqn);
    Node {
        fqn: fqn.to_string(),
        kind: NodeKind::Function,
        path: PathBuf::from(path),
        line_range: Some((1, 12)),
        signature: Some(format!("fn {name}()")),
        docstring: Some(format!("Does the {name} thing.")),
        content: format!("fn {name}() {{\n    // body of {fqn}\n}}\n"),
    }
}

/// A class node.
pub fn class(fqn: &str, path: &str) -> Node {
    let name = fqn.rsplit("::").next().unwrap_or(fqn);
    Node {
        fqn: fqn.to_string(),
        kind: NodeKind::Class,
        path: PathBuf::from(path),
        line_range: Some((1, 40)),
        signature: Some(format!("class {name}")),
        docstring: None,
        content: format!("class {name}:\n    pass\n"),
    }
}

/// A file node.
pub fn file(fqn: &str, path: &str) -> Node {
    Node {
        fqn: fqn.to_string(),
        kind: NodeKind::File,
        path: PathBuf::from(path),
        line_range: None,
        signature: None,
        docstring: None,
        content: String::new(),
    }
}

pub fn calls(source: &str, target: &str) -> Edge {
    Edge {
        source_fqn: source.to_string(),
        target_fqn: target.to_string(),
        kind: EdgeKind::Calls,
        line: None,
    }
}

pub fn imports(source: &str, target: &str) -> Edge {
    Edge {
        source_fqn: source.to_string(),
        target_fqn: target.to_string(),
        kind: EdgeKind::Imports,
        line: Some(1),
    }
}
