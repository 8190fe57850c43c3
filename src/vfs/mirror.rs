//! In-memory mirror of the remote node graph.
//!
//! The mirror owns the only tree snapshot. `refresh` discards the
//! previous tree and rebuilds it from the flat remote listing, swapping
//! the pointer atomically once the new tree is complete; every structural
//! read holds the same global lock for its whole duration, so callers see
//! either the old complete tree or the new complete tree, never a partial
//! one.

use crate::mega_service::client::StorageClient;
use crate::mega_service::models::{MegaNode, NodeKind};
use crate::vfs::node::NodeTree;
use anyhow::{anyhow, Result};
use log::{debug, info};
use std::sync::{Arc, RwLock};

pub struct NodeMirror {
    client: Arc<dyn StorageClient>,
    tree: RwLock<Option<NodeTree<MegaNode>>>,
    /// Serializes concurrent refreshes so an older listing can never
    /// overwrite a newer one.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl NodeMirror {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self {
            client,
            tree: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Fetch the complete remote listing and rebuild the tree from
    /// scratch. Remote failures propagate; the previous snapshot stays in
    /// place when the fetch fails.
    pub async fn refresh(&self) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        let nodes = self.client.fetch_nodes().await?;
        let new_tree = build_tree(nodes)?;
        debug!("Rebuilt node mirror with {} nodes", new_tree.len());

        let mut slot = self.tree.write().unwrap();
        if let Some(mut old) = slot.take() {
            let root = old.root();
            old.clear_children(root, true);
        }
        *slot = Some(new_tree);
        Ok(())
    }

    /// Run a closure against the current snapshot under the global lock.
    /// Returns `None` when the mirror has never been primed.
    pub fn read<R>(&self, f: impl FnOnce(&NodeTree<MegaNode>) -> R) -> Option<R> {
        let slot = self.tree.read().unwrap();
        slot.as_ref().map(f)
    }

    pub fn is_primed(&self) -> bool {
        self.tree.read().unwrap().is_some()
    }
}

/// Reconstruct the hierarchy from a flat listing purely by
/// identifier/parent-identifier matching, depth-first, preserving the
/// order the remote returned.
fn build_tree(nodes: Vec<MegaNode>) -> Result<NodeTree<MegaNode>> {
    let root = nodes
        .iter()
        .find(|n| n.kind == NodeKind::Root)
        .cloned()
        .ok_or_else(|| anyhow!("Remote listing contains no root node"))?;
    info!("Building tree from {} remote nodes (root {})", nodes.len(), root.id);

    let mut tree = NodeTree::new(root.name.clone(), Some(root.clone()));
    let tree_root = tree.root();
    attach_children(&mut tree, tree_root, &root.id, &nodes);
    Ok(tree)
}

fn attach_children(
    tree: &mut NodeTree<MegaNode>,
    parent: crate::vfs::node::NodeId,
    parent_remote_id: &str,
    nodes: &[MegaNode],
) {
    for node in nodes.iter().filter(|n| n.parent_id == parent_remote_id) {
        let child = tree.add_child(parent, node.name.clone(), Some(node.clone()));
        attach_children(tree, child, &node.id, nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, parent: &str, name: &str, kind: NodeKind) -> MegaNode {
        MegaNode {
            id: id.to_string(),
            parent_id: parent.to_string(),
            name: name.to_string(),
            kind,
            size: 0,
            created: Utc::now(),
            modified: Utc::now(),
            owner: "u".to_string(),
        }
    }

    #[test]
    fn test_build_tree_reconstructs_hierarchy() {
        let nodes = vec![
            node("root", "", "Cloud Drive", NodeKind::Root),
            node("a", "root", "A", NodeKind::Folder),
            node("b", "a", "B.txt", NodeKind::File),
            node("trash", "", "Trash", NodeKind::Trash),
        ];
        let tree = build_tree(nodes).unwrap();

        let a = tree.navigate(tree.root(), "/A").unwrap();
        assert_eq!(tree.payload(a).unwrap().id, "a");
        let b = tree.navigate(tree.root(), "/A/B.txt").unwrap();
        assert_eq!(tree.payload(b).unwrap().id, "b");
        // Trash has no parent edge into the root listing here, so it is
        // not reachable below the root node.
        assert!(tree.navigate(tree.root(), "/Trash").is_none());
    }

    #[test]
    fn test_build_tree_preserves_listing_order() {
        let nodes = vec![
            node("root", "", "Cloud Drive", NodeKind::Root),
            node("z", "root", "zeta", NodeKind::Folder),
            node("a", "root", "alpha", NodeKind::Folder),
            node("m", "root", "mid", NodeKind::File),
        ];
        let tree = build_tree(nodes).unwrap();
        let names: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&c| tree.name(c).to_string())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_build_tree_requires_root() {
        let nodes = vec![node("a", "root", "A", NodeKind::Folder)];
        assert!(build_tree(nodes).is_err());
    }
}
