use tracing::debug;

use crate::storage::alloc::{Allocator, DbItemReference};
use crate::storage::index::{AccessMethod, ConsistencyReport, Entry, IndexEngine};
use crate::types::{Result, StoreError};

use super::node::RadixTreeNode;

/// Prefix-compressed radix tree whose nodes are allocator blobs.
///
/// A node's reference changes whenever its blob moves to another size range; [`RadixTree`]
/// then rewrites the parent entry, the children's parent references, and the root pointer.
pub struct RadixTree {
    root: DbItemReference,
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn joined(acc: &[u8], prefix: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(acc.len() + prefix.len());
    full.extend_from_slice(acc);
    full.extend_from_slice(prefix);
    full
}

impl RadixTree {
    /// Creates an empty tree: a root blob with an empty prefix.
    pub fn create(alloc: &mut Allocator) -> Result<Self> {
        let root = alloc.allocate(&RadixTreeNode::default().encode())?;
        debug!(root = %root, "created radix tree");
        Ok(Self { root })
    }

    /// Opens the tree rooted at `root`.
    pub fn open(alloc: &Allocator, root: DbItemReference) -> Result<Self> {
        let tree = Self { root };
        let node = tree.load(alloc, root)?;
        if node.parent.is_some() || !node.prefix.is_empty() {
            return Err(StoreError::Corruption("radix root has a parent or prefix"));
        }
        Ok(tree)
    }

    fn load(&self, alloc: &Allocator, at: DbItemReference) -> Result<RadixTreeNode> {
        RadixTreeNode::decode(&alloc.get(at)?)
    }

    /// Writes `node` at `at`, repairing every pointer to it if the blob moved.
    fn save(
        &mut self,
        alloc: &mut Allocator,
        at: DbItemReference,
        node: &RadixTreeNode,
    ) -> Result<DbItemReference> {
        let moved = alloc.reallocate(at, &node.encode())?;
        if moved == at {
            return Ok(at);
        }
        match node.parent {
            None => self.root = moved,
            Some(parent_at) => {
                let mut parent = self.load(alloc, parent_at)?;
                let byte = *node
                    .prefix
                    .first()
                    .ok_or(StoreError::Corruption("non-root radix node without prefix"))?;
                parent.set_child(byte, moved);
                self.save(alloc, parent_at, &parent)?;
            }
        }
        for (_, child_at) in &node.children {
            let mut child = self.load(alloc, *child_at)?;
            child.parent = Some(moved);
            self.save(alloc, *child_at, &child)?;
        }
        Ok(moved)
    }

    /// Folds a valueless single-child node into its child.
    fn merge_into_child(
        &mut self,
        alloc: &mut Allocator,
        at: DbItemReference,
        node: RadixTreeNode,
    ) -> Result<()> {
        let (_, child_at) = node.children[0];
        let parent_at = node
            .parent
            .ok_or(StoreError::Corruption("radix root cannot be merged"))?;
        let mut child = self.load(alloc, child_at)?;
        child.prefix = joined(&node.prefix, &child.prefix);
        child.parent = Some(parent_at);
        let child_at = self.save(alloc, child_at, &child)?;
        let mut parent = self.load(alloc, parent_at)?;
        parent.set_child(child.prefix[0], child_at);
        self.save(alloc, parent_at, &parent)?;
        alloc.free(at)
    }

    fn subtree_min(
        &self,
        alloc: &Allocator,
        at: DbItemReference,
        acc: &[u8],
    ) -> Result<Option<Entry>> {
        let node = self.load(alloc, at)?;
        let full = joined(acc, &node.prefix);
        if let Some(value) = node.value {
            return Ok(Some((full, value)));
        }
        match node.children.first() {
            Some((_, child)) => self.subtree_min(alloc, *child, &full),
            None => Ok(None),
        }
    }

    fn subtree_max(
        &self,
        alloc: &Allocator,
        at: DbItemReference,
        acc: &[u8],
    ) -> Result<Option<Entry>> {
        let node = self.load(alloc, at)?;
        let full = joined(acc, &node.prefix);
        if let Some((_, child)) = node.children.last() {
            if let Some(found) = self.subtree_max(alloc, *child, &full)? {
                return Ok(Some(found));
            }
        }
        Ok(node.value.map(|value| (full, value)))
    }

    fn successor(
        &self,
        alloc: &Allocator,
        at: DbItemReference,
        acc: &[u8],
        key: &[u8],
    ) -> Result<Option<Entry>> {
        let node = self.load(alloc, at)?;
        let full = joined(acc, &node.prefix);
        let shared = common_prefix(&full, key);
        if shared < full.len() {
            // Either `key` ends inside this prefix or the two diverge here.
            if shared == key.len() || full[shared] > key[shared] {
                return self.subtree_min(alloc, at, acc);
            }
            return Ok(None);
        }
        if full.len() == key.len() {
            return match node.children.first() {
                Some((_, child)) => self.subtree_min(alloc, *child, &full),
                None => Ok(None),
            };
        }
        let next_byte = key[full.len()];
        for (byte, child) in &node.children {
            if *byte == next_byte {
                if let Some(found) = self.successor(alloc, *child, &full, key)? {
                    return Ok(Some(found));
                }
            } else if *byte > next_byte {
                return self.subtree_min(alloc, *child, &full);
            }
        }
        Ok(None)
    }

    fn predecessor(
        &self,
        alloc: &Allocator,
        at: DbItemReference,
        acc: &[u8],
        key: &[u8],
    ) -> Result<Option<Entry>> {
        let node = self.load(alloc, at)?;
        let full = joined(acc, &node.prefix);
        let shared = common_prefix(&full, key);
        if shared < full.len() {
            if shared < key.len() && full[shared] < key[shared] {
                return self.subtree_max(alloc, at, acc);
            }
            return Ok(None);
        }
        if full.len() == key.len() {
            return Ok(None);
        }
        let next_byte = key[full.len()];
        for (byte, child) in node.children.iter().rev() {
            if *byte == next_byte {
                if let Some(found) = self.predecessor(alloc, *child, &full, key)? {
                    return Ok(Some(found));
                }
            } else if *byte < next_byte {
                return self.subtree_max(alloc, *child, &full);
            }
        }
        Ok(node.value.map(|value| (full, value)))
    }

    /// Node holding exactly `key`, with its reference.
    fn find(
        &self,
        alloc: &Allocator,
        key: &[u8],
    ) -> Result<Option<(DbItemReference, RadixTreeNode)>> {
        let mut at = self.root;
        let mut node = self.load(alloc, at)?;
        let mut rest = key;
        loop {
            if !rest.starts_with(&node.prefix) {
                return Ok(None);
            }
            rest = &rest[node.prefix.len()..];
            let Some(&byte) = rest.first() else {
                return Ok(Some((at, node)));
            };
            match node.child(byte) {
                Some(child) => {
                    at = child;
                    node = self.load(alloc, at)?;
                }
                None => return Ok(None),
            }
        }
    }

    fn count_from(&self, alloc: &Allocator, at: DbItemReference) -> Result<u64> {
        let node = self.load(alloc, at)?;
        let mut total = u64::from(node.value.is_some());
        for (_, child) in &node.children {
            total += self.count_from(alloc, *child)?;
        }
        Ok(total)
    }

    fn check_node(
        &self,
        alloc: &Allocator,
        at: DbItemReference,
        parent: Option<DbItemReference>,
        report: &mut ConsistencyReport,
    ) -> Result<Option<String>> {
        report.nodes += 1;
        let node = self.load(alloc, at)?;
        if node.parent != parent {
            return Ok(Some(format!("node {at} records the wrong parent")));
        }
        if parent.is_some() {
            if node.prefix.is_empty() {
                return Ok(Some(format!("non-root node {at} has an empty prefix")));
            }
            if node.value.is_none() && node.children.len() < 2 {
                return Ok(Some(format!(
                    "valueless node {at} with {} children was not compressed",
                    node.children.len()
                )));
            }
        }
        if node.value.is_some() {
            report.keys += 1;
        }
        for pair in node.children.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Ok(Some(format!("children of node {at} are not sorted")));
            }
        }
        for (byte, child_at) in &node.children {
            let child = self.load(alloc, *child_at)?;
            if child.prefix.first() != Some(byte) {
                return Ok(Some(format!(
                    "child {child_at} of node {at} does not start with its key byte"
                )));
            }
            if let Some(msg) = self.check_node(alloc, *child_at, Some(at), report)? {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

impl IndexEngine for RadixTree {
    fn access_method(&self) -> AccessMethod {
        AccessMethod::Radix
    }

    fn root(&self) -> Option<DbItemReference> {
        Some(self.root)
    }

    fn get(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<DbItemReference>> {
        Ok(self.find(alloc, key)?.and_then(|(_, node)| node.value))
    }

    fn set(
        &mut self,
        alloc: &mut Allocator,
        key: &[u8],
        value: DbItemReference,
    ) -> Result<Option<DbItemReference>> {
        let mut at = self.root;
        let mut node = self.load(alloc, at)?;
        let mut rest = key;
        loop {
            let Some(&byte) = rest.first() else {
                let previous = node.value.replace(value);
                self.save(alloc, at, &node)?;
                return Ok(previous);
            };
            let Some(child_at) = node.child(byte) else {
                let leaf = RadixTreeNode {
                    prefix: rest.to_vec(),
                    value: Some(value),
                    parent: Some(at),
                    ..RadixTreeNode::default()
                };
                let leaf_at = alloc.allocate(&leaf.encode())?;
                node.set_child(byte, leaf_at);
                self.save(alloc, at, &node)?;
                return Ok(None);
            };
            let mut child = self.load(alloc, child_at)?;
            let shared = common_prefix(&child.prefix, rest);
            if shared < child.prefix.len() {
                let mut middle = RadixTreeNode {
                    prefix: child.prefix[..shared].to_vec(),
                    parent: Some(at),
                    ..RadixTreeNode::default()
                };
                middle.set_child(child.prefix[shared], child_at);
                let middle_at = alloc.allocate(&middle.encode())?;
                node.set_child(byte, middle_at);
                self.save(alloc, at, &node)?;
                child.prefix.drain(..shared);
                child.parent = Some(middle_at);
                self.save(alloc, child_at, &child)?;
                // the middle node may have been rewritten by the child's relocation
                at = middle_at;
                node = self.load(alloc, at)?;
            } else {
                at = child_at;
                node = child;
            }
            rest = &rest[shared..];
        }
    }

    fn remove(&mut self, alloc: &mut Allocator, key: &[u8]) -> Result<Option<DbItemReference>> {
        let Some((at, mut node)) = self.find(alloc, key)? else {
            return Ok(None);
        };
        let Some(removed) = node.value.take() else {
            return Ok(None);
        };
        let Some(parent_at) = node.parent else {
            self.save(alloc, at, &node)?;
            return Ok(Some(removed));
        };
        match node.children.len() {
            0 => {
                let mut parent = self.load(alloc, parent_at)?;
                parent.remove_child(node.prefix[0]);
                alloc.free(at)?;
                let parent_at = self.save(alloc, parent_at, &parent)?;
                if parent.parent.is_some() && parent.value.is_none() && parent.children.len() == 1
                {
                    self.merge_into_child(alloc, parent_at, parent)?;
                }
            }
            1 => self.merge_into_child(alloc, at, node)?,
            _ => {
                self.save(alloc, at, &node)?;
            }
        }
        Ok(Some(removed))
    }

    fn min(&self, alloc: &Allocator) -> Result<Option<Entry>> {
        self.subtree_min(alloc, self.root, &[])
    }

    fn max(&self, alloc: &Allocator) -> Result<Option<Entry>> {
        self.subtree_max(alloc, self.root, &[])
    }

    fn previous_to(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>> {
        self.predecessor(alloc, self.root, &[], key)
    }

    fn next_to(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>> {
        self.successor(alloc, self.root, &[], key)
    }

    fn count(&self, alloc: &Allocator) -> Result<u64> {
        self.count_from(alloc, self.root)
    }

    fn check_consistency(&self, alloc: &Allocator) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let root = self.load(alloc, self.root)?;
        if !root.prefix.is_empty() {
            return Ok(ConsistencyReport::broken("root has a non-empty prefix", 1, 0));
        }
        match self.check_node(alloc, self.root, None, &mut report)? {
            Some(msg) => Ok(ConsistencyReport::broken(msg, report.nodes, report.keys)),
            None => Ok(ConsistencyReport::sound(report.nodes, report.keys)),
        }
    }

    fn has_sub_keys(&self, alloc: &Allocator, key: &[u8]) -> Result<bool> {
        let mut node = self.load(alloc, self.root)?;
        let mut rest = key;
        loop {
            let shared = common_prefix(&node.prefix, rest);
            if shared == rest.len() {
                // `key` ends inside or at the end of this node's prefix.
                return Ok(if shared < node.prefix.len() {
                    true
                } else {
                    !node.children.is_empty()
                });
            }
            if shared < node.prefix.len() {
                return Ok(false);
            }
            rest = &rest[shared..];
            match node.child(rest[0]) {
                Some(child) => node = self.load(alloc, child)?,
                None => return Ok(false),
            }
        }
    }
}
