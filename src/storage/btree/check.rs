//! Structural validation of a B+ tree.

use std::sync::Arc;

use crate::storage::index::ConsistencyReport;
use crate::types::{PageId, Result};

use super::node::BPlusTreeNode;
use super::tree::BPlusTree;

struct Walk {
    nodes: u64,
    keys: u64,
    leaf_depth: Option<usize>,
    leaves: Vec<PageId>,
}

enum Verdict {
    Sound,
    Broken(String),
}

fn bounds_hold(key: &[u8], lower: Option<&[u8]>, upper: Option<&[u8]>) -> bool {
    lower.map_or(true, |lo| key >= lo) && upper.map_or(true, |hi| key < hi)
}

fn visit(
    tree: &BPlusTree,
    node: &Arc<BPlusTreeNode>,
    parent: Option<PageId>,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    depth: usize,
    walk: &mut Walk,
) -> Result<Verdict> {
    walk.nodes += 1;
    let id = node.index.0;
    if node.parent != parent {
        return Ok(Verdict::Broken(format!(
            "node {id} records parent {:?}, expected {:?}",
            node.parent.map(|p| p.0),
            parent.map(|p| p.0)
        )));
    }
    if node.entries.len() > tree.capacity() {
        return Ok(Verdict::Broken(format!(
            "node {id} holds {} entries, capacity is {}",
            node.entries.len(),
            tree.capacity()
        )));
    }
    for pair in node.entries.windows(2) {
        if pair[0].0 >= pair[1].0 {
            return Ok(Verdict::Broken(format!("node {id} keys are not strictly ascending")));
        }
    }
    for (key, _) in &node.entries {
        if !bounds_hold(key, lower, upper) {
            return Ok(Verdict::Broken(format!(
                "node {id} holds a key outside its separator bounds"
            )));
        }
    }
    if node.is_leaf {
        if node.entries.is_empty() && parent.is_some() {
            return Ok(Verdict::Broken(format!("non-root leaf {id} is empty")));
        }
        match walk.leaf_depth {
            None => walk.leaf_depth = Some(depth),
            Some(d) if d != depth => {
                return Ok(Verdict::Broken(format!(
                    "leaf {id} at depth {depth}, other leaves at depth {d}"
                )));
            }
            Some(_) => {}
        }
        walk.keys += node.entries.len() as u64;
        walk.leaves.push(node.index);
        return Ok(Verdict::Sound);
    }
    if node.prev.is_some() || node.next.is_some() {
        return Ok(Verdict::Broken(format!("internal node {id} has sibling links")));
    }
    let children = node.children();
    for (i, child) in children.iter().enumerate() {
        let child_lower = if i == 0 {
            lower
        } else {
            Some(node.entries[i - 1].0.as_slice())
        };
        let child_upper = node
            .entries
            .get(i)
            .map(|(k, _)| k.as_slice())
            .or(upper);
        let child_node = tree.nodes().fetch(*child)?;
        if let Verdict::Broken(msg) = visit(
            tree,
            &child_node,
            Some(node.index),
            child_lower,
            child_upper,
            depth + 1,
            walk,
        )? {
            return Ok(Verdict::Broken(msg));
        }
    }
    Ok(Verdict::Sound)
}

fn check_sibling_chain(tree: &BPlusTree, leaves: &[PageId]) -> Result<Option<String>> {
    let mut prev: Option<PageId> = None;
    for (i, &leaf) in leaves.iter().enumerate() {
        let node = tree.nodes().fetch(leaf)?;
        if node.prev != prev {
            return Ok(Some(format!("leaf {} has a broken previous link", leaf.0)));
        }
        if node.next != leaves.get(i + 1).copied() {
            return Ok(Some(format!("leaf {} has a broken next link", leaf.0)));
        }
        if let (Some(p), Some((first, _))) = (prev, node.entries.first()) {
            let before = tree.nodes().fetch(p)?;
            if let Some((last, _)) = before.entries.last() {
                if last >= first {
                    return Ok(Some(format!("leaf {} overlaps its left sibling", leaf.0)));
                }
            }
        }
        prev = Some(leaf);
    }
    Ok(None)
}

/// Runs every structural check and reports the first problem found.
pub(super) fn check(tree: &BPlusTree) -> Result<ConsistencyReport> {
    let root = tree.nodes().fetch(tree.root_page())?;
    let mut walk = Walk {
        nodes: 0,
        keys: 0,
        leaf_depth: None,
        leaves: Vec::new(),
    };
    if let Verdict::Broken(msg) = visit(tree, &root, None, None, None, 0, &mut walk)? {
        return Ok(ConsistencyReport::broken(msg, walk.nodes, walk.keys));
    }
    if let Some(msg) = check_sibling_chain(tree, &walk.leaves)? {
        return Ok(ConsistencyReport::broken(msg, walk.nodes, walk.keys));
    }
    Ok(ConsistencyReport::sound(walk.nodes, walk.keys))
}
