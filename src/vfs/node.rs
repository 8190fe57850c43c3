//! Generic singly-rooted ownership tree mirroring the remote hierarchy.
//!
//! Nodes live in an arena and are addressed by stable [`NodeId`] handles;
//! a node owns its children exclusively, the parent link is a non-owning
//! back-reference. All structural access goes through the tree, which is
//! what the mirror guards with its global lock.

pub const PATH_SEPARATOR: char = '/';
pub const PATH_SAME: &str = ".";
pub const PATH_PARENT: &str = "..";

/// Stable handle of a node within one [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct NodeSlot<T> {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    payload: Option<T>,
}

/// Arena-backed tree with exactly one parentless node (the root).
/// Child order is insertion order.
#[derive(Debug)]
pub struct NodeTree<T> {
    slots: Vec<NodeSlot<T>>,
    root: NodeId,
}

impl<T> NodeTree<T> {
    pub fn new(root_name: impl Into<String>, payload: Option<T>) -> Self {
        Self {
            slots: vec![NodeSlot {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
                payload,
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>, payload: Option<T>) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(NodeSlot {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            payload,
        });
        self.slots[parent.0].children.push(id);
        id
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.slots[id.0].name
    }

    pub fn payload(&self, id: NodeId) -> Option<&T> {
        self.slots[id.0].payload.as_ref()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.slots[id.0].parent.is_none()
    }

    /// Path from the root to this node, separator-joined. The root itself
    /// is rendered as the bare separator.
    pub fn path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            segments.push(self.name(current).to_string());
            current = parent;
        }
        if segments.is_empty() {
            return PATH_SEPARATOR.to_string();
        }
        segments.reverse();
        format!("{}{}", PATH_SEPARATOR, segments.join(&PATH_SEPARATOR.to_string()))
    }

    /// Resolve a path string relative to `from`.
    ///
    /// A path equal to the bare separator resolves to the root regardless
    /// of `from`; a trailing separator is stripped; `.` is the node
    /// itself; `..` is the parent, or the node itself at the root; a
    /// leading separator restarts resolution at the root; any other
    /// segment is matched case-insensitively against immediate children.
    pub fn navigate(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let path = path.trim();

        if path.len() == 1 && path.starts_with(PATH_SEPARATOR) {
            return Some(self.root);
        }

        let path = path.trim_end_matches(PATH_SEPARATOR);

        if path == PATH_SAME {
            return Some(from);
        }
        if path == PATH_PARENT {
            return Some(self.parent(from).unwrap_or(from));
        }

        match path.find(PATH_SEPARATOR) {
            Some(ndx) => {
                let node = if ndx == 0 {
                    Some(self.root)
                } else {
                    let segment = path[..ndx].trim();
                    if segment == PATH_PARENT {
                        Some(self.parent(from).unwrap_or(from))
                    } else if segment == PATH_SAME {
                        Some(from)
                    } else {
                        self.child_by_name(from, segment)
                    }
                };
                self.navigate(node?, &path[ndx + 1..])
            }
            None => self.child_by_name(from, path),
        }
    }

    /// First immediate child whose name matches case-insensitively.
    pub fn child_by_name(&self, of: NodeId, name: &str) -> Option<NodeId> {
        let wanted = name.to_lowercase();
        self.children(of)
            .iter()
            .copied()
            .find(|&c| self.name(c).to_lowercase() == wanted)
    }

    /// Immediate children whose name matches a case-insensitive wildcard
    /// pattern (`*` and `?`), in child order.
    pub fn find_children<'a>(
        &'a self,
        of: NodeId,
        pattern: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children(of)
            .iter()
            .copied()
            .filter(move |&c| wildcard_match(pattern, self.name(c)))
    }

    /// Detach all children of a node, optionally emptying descendants
    /// first. Used as part of whole-tree teardown before a rebuild.
    pub fn clear_children(&mut self, of: NodeId, recursive: bool) {
        if recursive {
            let children = self.slots[of.0].children.clone();
            for child in children {
                self.clear_children(child, true);
            }
        }
        self.slots[of.0].children.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Case-insensitive glob match supporting `*` (any run) and `?` (any one
/// character).
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..])),
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) => *pc == *nc && matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let n: Vec<char> = name.to_lowercase().chars().collect();
    matches(&p, &n)
}

/// Split a full path into its parent directory path and final segment by
/// the last separator. A top-level entry gets the bare separator as its
/// parent path.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    match trimmed.rfind(PATH_SEPARATOR) {
        Some(0) => (&trimmed[..1], &trimmed[1..]),
        Some(ndx) => (&trimmed[..ndx], &trimmed[ndx + 1..]),
        None => ("", trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> NodeTree<u32> {
        // /
        // ├── Docs
        // │   ├── a.txt
        // │   └── b.txt
        // └── Music
        let mut tree = NodeTree::new("root", Some(0));
        let docs = tree.add_child(tree.root(), "Docs", Some(1));
        tree.add_child(docs, "a.txt", Some(2));
        tree.add_child(docs, "b.txt", Some(3));
        tree.add_child(tree.root(), "Music", Some(4));
        tree
    }

    #[test]
    fn test_navigate_separator_returns_root() {
        let tree = sample_tree();
        let docs = tree.navigate(tree.root(), "/Docs").unwrap();
        assert_eq!(tree.navigate(docs, "/"), Some(tree.root()));
        assert_eq!(tree.navigate(tree.root(), "/"), Some(tree.root()));
    }

    #[test]
    fn test_navigate_parent_of_root_is_root() {
        let tree = sample_tree();
        assert_eq!(tree.navigate(tree.root(), ".."), Some(tree.root()));
    }

    #[test]
    fn test_navigate_self_and_parent() {
        let tree = sample_tree();
        let docs = tree.navigate(tree.root(), "/Docs").unwrap();
        assert_eq!(tree.navigate(docs, "."), Some(docs));
        assert_eq!(tree.navigate(docs, ".."), Some(tree.root()));
        assert_eq!(tree.navigate(docs, "../Music"), tree.navigate(tree.root(), "/Music"));
    }

    #[test]
    fn test_navigate_case_insensitive() {
        let tree = sample_tree();
        let upper = tree.navigate(tree.root(), "/Docs/A.TXT");
        let lower = tree.navigate(tree.root(), "/docs/a.txt");
        assert!(upper.is_some());
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_navigate_is_idempotent() {
        let tree = sample_tree();
        let first = tree.navigate(tree.root(), "/Docs/b.txt");
        let second = tree.navigate(tree.root(), "/Docs/b.txt");
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_navigate_trailing_separator() {
        let tree = sample_tree();
        assert_eq!(
            tree.navigate(tree.root(), "/Docs/"),
            tree.navigate(tree.root(), "/Docs")
        );
    }

    #[test]
    fn test_navigate_missing_segment() {
        let tree = sample_tree();
        assert_eq!(tree.navigate(tree.root(), "/Nope/a.txt"), None);
        assert_eq!(tree.navigate(tree.root(), "/Docs/nope"), None);
    }

    #[test]
    fn test_rooted_path_from_subdirectory() {
        let tree = sample_tree();
        let docs = tree.navigate(tree.root(), "/Docs").unwrap();
        assert_eq!(tree.navigate(docs, "/Music"), tree.navigate(tree.root(), "/Music"));
    }

    #[test]
    fn test_path_rendering() {
        let tree = sample_tree();
        let a = tree.navigate(tree.root(), "/Docs/a.txt").unwrap();
        assert_eq!(tree.path(a), "/Docs/a.txt");
        assert_eq!(tree.path(tree.root()), "/");
    }

    #[test]
    fn test_find_children_patterns() {
        let tree = sample_tree();
        let docs = tree.navigate(tree.root(), "/Docs").unwrap();
        let txt: Vec<_> = tree.find_children(docs, "*.txt").map(|c| tree.name(c).to_string()).collect();
        assert_eq!(txt, vec!["a.txt", "b.txt"]);
        let just_a: Vec<_> = tree.find_children(docs, "A.*").map(|c| tree.name(c).to_string()).collect();
        assert_eq!(just_a, vec!["a.txt"]);
        let single: Vec<_> = tree.find_children(docs, "?.txt").map(|c| tree.name(c).to_string()).collect();
        assert_eq!(single.len(), 2);
    }

    #[test]
    fn test_clear_children() {
        let mut tree = sample_tree();
        tree.clear_children(tree.root(), true);
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/Docs/a.txt"), ("/Docs", "a.txt"));
        assert_eq!(split_parent("/Docs"), ("/", "Docs"));
        assert_eq!(split_parent("/Docs/"), ("/", "Docs"));
        assert_eq!(split_parent("plain"), ("", "plain"));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*.TXT", "notes.txt"));
        assert!(wildcard_match("repor?.pdf", "report.pdf"));
        assert!(!wildcard_match("*.txt", "notes.pdf"));
        assert!(wildcard_match("", ""));
        assert!(!wildcard_match("", "x"));
    }
}
