//! Shared test fixtures: an in-memory storage backend standing in for
//! the remote API, with per-operation call counters, plus node builders.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mega_vdrive::mega_service::models::{AccountQuota, MegaNode, NodeKind};
use mega_vdrive::mega_service::StorageClient;
use mega_vdrive::vfs::dispatcher::ConfirmDelete;
use mega_vdrive::vfs::{CacheManager, Dispatcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::runtime::Runtime;

pub const ROOT_ID: &str = "root0001";
pub const INBOX_ID: &str = "inbox001";
pub const TRASH_ID: &str = "trash001";

#[derive(Default)]
pub struct CallCounters {
    pub fetch_nodes: AtomicUsize,
    pub create_folder: AtomicUsize,
    pub delete_node: AtomicUsize,
    pub permanent_delete: AtomicUsize,
    pub move_node: AtomicUsize,
    pub rename_node: AtomicUsize,
    pub download: AtomicUsize,
    pub upload: AtomicUsize,
    pub quota: AtomicUsize,
}

/// In-memory stand-in for the remote storage API. Mutations apply to the
/// shared node list, so a subsequent fetch observes them, mirroring the
/// real service's behavior.
pub struct MockStorageClient {
    pub nodes: Mutex<Vec<MegaNode>>,
    pub content: Mutex<HashMap<String, Vec<u8>>>,
    pub counters: CallCounters,
    pub fail_uploads: AtomicBool,
    next_id: AtomicUsize,
}

impl MockStorageClient {
    pub fn new(nodes: Vec<MegaNode>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            content: Mutex::new(HashMap::new()),
            counters: CallCounters::default(),
            fail_uploads: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn set_content(&self, node_id: &str, bytes: &[u8]) {
        self.content
            .lock()
            .unwrap()
            .insert(node_id.to_string(), bytes.to_vec());
    }

    fn generate_id(&self) -> String {
        format!("gen{:05}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn remove_recursive(nodes: &mut Vec<MegaNode>, id: &str) {
        let children: Vec<String> = nodes
            .iter()
            .filter(|n| n.parent_id == id)
            .map(|n| n.id.clone())
            .collect();
        for child in children {
            Self::remove_recursive(nodes, &child);
        }
        nodes.retain(|n| n.id != id);
    }
}

#[async_trait]
impl StorageClient for MockStorageClient {
    async fn fetch_nodes(&self) -> Result<Vec<MegaNode>> {
        self.counters.fetch_nodes.fetch_add(1, Ordering::SeqCst);
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn quota(&self) -> Result<AccountQuota> {
        self.counters.quota.fetch_add(1, Ordering::SeqCst);
        Ok(AccountQuota {
            used: 10 * 1024 * 1024,
            total: 50 * 1024 * 1024,
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<()> {
        self.counters.create_folder.fetch_add(1, Ordering::SeqCst);
        let node = folder(&self.generate_id(), parent_id, name);
        self.nodes.lock().unwrap().push(node);
        Ok(())
    }

    async fn delete_node(&self, node_id: &str, permanent: bool) -> Result<()> {
        self.counters.delete_node.fetch_add(1, Ordering::SeqCst);
        if permanent {
            self.counters.permanent_delete.fetch_add(1, Ordering::SeqCst);
        }
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.iter().any(|n| n.id == node_id) {
            return Err(anyhow!("No such node: {}", node_id));
        }
        Self::remove_recursive(&mut nodes, node_id);
        Ok(())
    }

    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<()> {
        self.counters.move_node.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| anyhow!("No such node: {}", node_id))?;
        node.parent_id = new_parent_id.to_string();
        Ok(())
    }

    async fn rename_node(&self, node_id: &str, new_name: &str) -> Result<()> {
        self.counters.rename_node.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| anyhow!("No such node: {}", node_id))?;
        node.name = new_name.to_string();
        Ok(())
    }

    async fn download(&self, node: &MegaNode) -> Result<Vec<u8>> {
        self.counters.download.fetch_add(1, Ordering::SeqCst);
        self.content
            .lock()
            .unwrap()
            .get(&node.id)
            .cloned()
            .ok_or_else(|| anyhow!("No content for node {}", node.id))
    }

    async fn download_to_path(&self, node: &MegaNode, target: &Path) -> Result<()> {
        self.counters.download.fetch_add(1, Ordering::SeqCst);
        let content = self
            .content
            .lock()
            .unwrap()
            .get(&node.id)
            .cloned()
            .ok_or_else(|| anyhow!("No content for node {}", node.id))?;
        std::fs::write(target, content)?;
        Ok(())
    }

    async fn upload(&self, parent_id: &str, name: &str, data: Vec<u8>) -> Result<()> {
        self.counters.upload.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated upload failure"));
        }
        let node = file(&self.generate_id(), parent_id, name, data.len() as u64);
        self.content
            .lock()
            .unwrap()
            .insert(node.id.clone(), data);
        self.nodes.lock().unwrap().push(node);
        Ok(())
    }
}

// ---- node builders ----

fn base_node(id: &str, parent_id: &str, name: &str, kind: NodeKind, size: u64) -> MegaNode {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    MegaNode {
        id: id.to_string(),
        parent_id: parent_id.to_string(),
        name: name.to_string(),
        kind,
        size,
        created: ts,
        modified: ts,
        owner: "tester01".to_string(),
    }
}

pub fn root() -> MegaNode {
    base_node(ROOT_ID, "", "Cloud Drive", NodeKind::Root, 0)
}

pub fn inbox() -> MegaNode {
    base_node(INBOX_ID, ROOT_ID, "Inbox", NodeKind::Inbox, 0)
}

pub fn trash() -> MegaNode {
    base_node(TRASH_ID, ROOT_ID, "Rubbish Bin", NodeKind::Trash, 0)
}

pub fn folder(id: &str, parent_id: &str, name: &str) -> MegaNode {
    base_node(id, parent_id, name, NodeKind::Folder, 0)
}

pub fn file(id: &str, parent_id: &str, name: &str, size: u64) -> MegaNode {
    base_node(id, parent_id, name, NodeKind::File, size)
}

/// The standard account layout used by most tests:
///
/// ```text
/// /            (root)
///   inbox
///   rubbish bin
///     old.txt
///   docs/
///     a.txt
///   pics/
/// ```
pub fn standard_account() -> Vec<MegaNode> {
    vec![
        root(),
        inbox(),
        trash(),
        file("old00001", TRASH_ID, "old.txt", 5),
        folder("docs0001", ROOT_ID, "Docs"),
        file("file0001", "docs0001", "a.txt", 11),
        folder("pics0001", ROOT_ID, "Pics"),
    ]
}

// ---- confirmation doubles ----

pub struct ConfirmAnswer {
    answer: bool,
    pub calls: AtomicUsize,
}

impl ConfirmAnswer {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            answer: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn declining() -> Arc<Self> {
        Arc::new(Self {
            answer: false,
            calls: AtomicUsize::new(0),
        })
    }
}

impl ConfirmDelete for ConfirmAnswer {
    fn confirm(&self, _description: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

/// Boxable handle that keeps the counter shared with the test body.
pub struct ConfirmHandle(pub Arc<ConfirmAnswer>);

impl ConfirmDelete for ConfirmHandle {
    fn confirm(&self, description: &str) -> bool {
        self.0.confirm(description)
    }
}

// ---- harness ----

pub const TEST_EMAIL: &str = "tester@example.com";
pub const TEST_THRESHOLD: u64 = 1024;

/// A mounted-in-memory drive: mock backend, real dispatcher, temp cache.
/// The runtime lives in the harness so blocking bridges stay valid.
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub client: Arc<MockStorageClient>,
    pub tmp: TempDir,
    _runtime: Runtime,
}

impl Harness {
    pub fn new(nodes: Vec<MegaNode>) -> Self {
        Self::with_confirm(nodes, ConfirmAnswer::declining())
    }

    pub fn with_confirm(nodes: Vec<MegaNode>, confirm: Arc<ConfirmAnswer>) -> Self {
        let runtime = Runtime::new().unwrap();
        let tmp = TempDir::new().unwrap();
        let client = Arc::new(MockStorageClient::new(nodes));
        let cache = CacheManager::new(
            tmp.path().join("content"),
            tmp.path().join("staging"),
            TEST_THRESHOLD,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(
            client.clone(),
            cache,
            Box::new(ConfirmHandle(confirm)),
            TEST_EMAIL.to_string(),
            "MEGA.NZ".to_string(),
            runtime.handle().clone(),
        );
        dispatcher.refresh().unwrap();
        Self {
            dispatcher,
            client,
            tmp,
            _runtime: runtime,
        }
    }
}
