//! Tree nodes, traversal and statistics

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::record::{FieldMapping, FlatRecord, RECORD_ID_FIELD};

/// Identifier of the synthetic node every tree hangs from
pub const ROOT_ID: &str = "__root__";

/// A record in the built tree.
///
/// Dropping, cloning and comparing walk the tree with an explicit stack, so
/// arbitrarily deep chains are safe. `Serialize` nests children and does
/// recurse; export very deep trees as a flat node list instead.
#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `None` for the root and for nodes attached directly under it
    pub parent_id: Option<String>,
    /// Root is depth 0, top-level records depth 1
    pub depth: usize,
    pub fields: BTreeMap<String, Value>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn synthetic_root(children: Vec<TreeNode>) -> Self {
        Self {
            id: ROOT_ID.to_string(),
            label: None,
            parent_id: None,
            depth: 0,
            fields: BTreeMap::new(),
            children,
        }
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0 && self.id == ROOT_ID
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Pre-order walk including `self`
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    /// Pre-order walk over real nodes, skipping the synthetic root
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.iter().filter(|n| !n.is_root())
    }

    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        self.nodes().find(|n| n.id == id)
    }

    /// Number of nodes below this one
    pub fn descendant_count(&self) -> usize {
        self.iter().count() - 1
    }

    /// Height of the subtree, counted in edges
    pub fn subtree_depth(&self) -> usize {
        self.iter()
            .map(|n| n.depth)
            .max()
            .unwrap_or(self.depth)
            .saturating_sub(self.depth)
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            top_level_nodes: if self.is_root() { self.children.len() } else { 1 },
            ..Default::default()
        };
        for node in self.nodes() {
            stats.total_nodes += 1;
            if node.is_leaf() {
                stats.leaf_nodes += 1;
            }
            stats.max_depth = stats.max_depth.max(node.depth);
            *stats.level_distribution.entry(node.depth).or_default() += 1;
        }
        stats
    }

    /// Flatten back into records, parents before children.
    ///
    /// The identifier goes to `mapping.id_field` and the parent identifier to
    /// the first parent field (empty for top-level nodes), so building the
    /// output again with the same mapping reproduces this tree.
    pub fn flatten(&self, mapping: &FieldMapping) -> Vec<FlatRecord> {
        let parent_field = mapping.primary_parent_field();
        self.nodes()
            .map(|node| {
                let mut fields: Map<String, Value> = node
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                fields.insert(
                    parent_field.to_string(),
                    Value::String(node.parent_id.clone().unwrap_or_default()),
                );

                let record_id = if mapping.id_field == RECORD_ID_FIELD {
                    Some(node.id.clone())
                } else {
                    fields.insert(mapping.id_field.clone(), Value::String(node.id.clone()));
                    None
                };
                FlatRecord::new(record_id, fields)
            })
            .collect()
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl Clone for TreeNode {
    fn clone(&self) -> Self {
        // Reverse pre-order: every child subtree is finished before its parent
        let mut built: Vec<TreeNode> = Vec::new();
        let order: Vec<&TreeNode> = self.iter().collect();
        for node in order.into_iter().rev() {
            let mut children = built.split_off(built.len() - node.children.len());
            children.reverse();
            built.push(TreeNode {
                id: node.id.clone(),
                label: node.label.clone(),
                parent_id: node.parent_id.clone(),
                depth: node.depth,
                fields: node.fields.clone(),
                children,
            });
        }
        built.pop().unwrap_or_else(|| TreeNode::synthetic_root(Vec::new()))
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.iter();
        let mut right = other.iter();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) => {
                    let same = a.id == b.id
                        && a.label == b.label
                        && a.parent_id == b.parent_id
                        && a.depth == b.depth
                        && a.fields == b.fields
                        && a.children.len() == b.children.len();
                    if !same {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

pub struct PreOrder<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Shape summary of a built tree (synthetic root excluded)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub top_level_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: usize,
    /// Depth -> node count
    pub level_distribution: BTreeMap<usize, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>, depth: usize, children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            id: id.to_string(),
            label: None,
            parent_id: parent.map(str::to_string),
            depth,
            fields: BTreeMap::new(),
            children,
        }
    }

    fn sample() -> TreeNode {
        TreeNode::synthetic_root(vec![
            node(
                "S1",
                None,
                1,
                vec![node("S2", Some("S1"), 2, vec![node("S3", Some("S2"), 3, vec![])])],
            ),
            node("S4", None, 1, vec![]),
        ])
    }

    #[test]
    fn test_preorder_walk() {
        let tree = sample();
        let ids: Vec<&str> = tree.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3", "S4"]);
        assert_eq!(tree.iter().next().map(|n| n.id.as_str()), Some(ROOT_ID));
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.top_level_nodes, 2);
        assert_eq!(stats.leaf_nodes, 2);
        assert_eq!(stats.max_depth, 3);
        assert_eq!(stats.level_distribution.get(&1), Some(&2));
        assert_eq!(stats.level_distribution.get(&3), Some(&1));
    }

    #[test]
    fn test_find_and_counts() {
        let tree = sample();
        let s1 = tree.find("S1").unwrap();
        assert_eq!(s1.descendant_count(), 2);
        assert_eq!(s1.subtree_depth(), 2);
        assert!(tree.find(ROOT_ID).is_none());
        assert!(tree.find("S9").is_none());
    }

    #[test]
    fn test_flatten_writes_structure_fields() {
        let mapping = FieldMapping::new("Story.No", "parent");
        let records = sample().flatten(&mapping);

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].text("Story.No").as_deref(), Some("S1"));
        assert_eq!(records[0].text("parent").as_deref(), Some(""));
        assert_eq!(records[2].text("parent").as_deref(), Some("S2"));
        assert!(records[0].record_id.is_none());

        let by_record_id = sample().flatten(&FieldMapping::new(RECORD_ID_FIELD, "parent"));
        assert_eq!(by_record_id[1].record_id.as_deref(), Some("S2"));
    }

    fn chain(len: usize) -> TreeNode {
        let mut tail = node(&format!("c{}", len - 1), None, len, vec![]);
        for i in (0..len - 1).rev() {
            tail = node(&format!("c{i}"), None, i + 1, vec![tail]);
        }
        TreeNode::synthetic_root(vec![tail])
    }

    #[test]
    fn test_clone_keeps_shape() {
        let tree = sample();
        let copy = tree.clone();
        assert_eq!(copy, tree);
        let ids: Vec<&str> = copy.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3", "S4"]);

        let mut other = sample();
        other.children[0].children[0].label = Some("changed".to_string());
        assert!(other != tree);
    }

    #[test]
    fn test_deep_chain_clone_compare_drop() {
        let tree = chain(200_000);
        let copy = tree.clone();
        assert!(copy == tree);
        assert_eq!(copy.stats().max_depth, 200_000);
        drop(copy);
        drop(tree);
    }
}
