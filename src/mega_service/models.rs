use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Node classification matching MEGA's internal integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    /// Regular file
    File = 0,
    /// Folder/directory
    Folder = 1,
    /// Root folder (Cloud Drive)
    Root = 2,
    /// Inbox folder
    Inbox = 3,
    /// Trash folder
    Trash = 4,
}

impl NodeKind {
    pub fn from_i64(t: i64) -> Option<Self> {
        match t {
            0 => Some(NodeKind::File),
            1 => Some(NodeKind::Folder),
            2 => Some(NodeKind::Root),
            3 => Some(NodeKind::Inbox),
            4 => Some(NodeKind::Trash),
            _ => None,
        }
    }

    /// Whether this kind can have children.
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeKind::File)
    }

    /// Root, Inbox and the Trash container itself must never be deleted
    /// or moved.
    pub fn is_protected(&self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Inbox | NodeKind::Trash)
    }
}

/// MegaNode: one entry of the flat node listing returned by the `f`
/// command. Parent/child edges exist only as `parent_id` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MegaNode {
    /// Node handle, unique within the account
    pub id: String,
    /// Handle of the containing node; empty for the account root
    #[serde(default)]
    pub parent_id: String,
    /// Decrypted display name
    pub name: String,
    pub kind: NodeKind,
    /// Content size in bytes, 0 for containers
    #[serde(default)]
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Owning user handle
    #[serde(default)]
    pub owner: String,
}

impl MegaNode {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }
}

/// Raw node entry as it appears on the wire, before attribute decoding.
#[derive(Debug, Deserialize)]
pub struct RawNode {
    #[serde(rename = "h")]
    pub handle: String,
    #[serde(rename = "p", default)]
    pub parent: String,
    #[serde(rename = "t")]
    pub node_type: i64,
    #[serde(rename = "a", default)]
    pub attributes: String,
    #[serde(rename = "s", default)]
    pub size: u64,
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
    #[serde(rename = "u", default)]
    pub owner: String,
}

impl RawNode {
    /// Convert into a [`MegaNode`], supplying the already-decoded name.
    pub fn into_node(self, name: String) -> Option<MegaNode> {
        let kind = NodeKind::from_i64(self.node_type)?;
        let ts = Utc.timestamp_opt(self.timestamp, 0).single().unwrap_or_else(Utc::now);
        Some(MegaNode {
            id: self.handle,
            parent_id: self.parent,
            name,
            kind,
            size: self.size,
            created: ts,
            modified: ts,
            owner: self.owner,
        })
    }
}

/// Decoded node attribute block, e.g. `MEGA{"n":"report.pdf"}`.
#[derive(Debug, Deserialize)]
pub struct NodeAttributes {
    #[serde(rename = "n", default)]
    pub name: String,
}

/// Response of the `f` (fetch nodes) command.
#[derive(Debug, Deserialize)]
pub struct FetchNodesResponse {
    #[serde(rename = "f", default)]
    pub nodes: Vec<RawNode>,
}

/// Account storage quota from the `uq` command.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccountQuota {
    /// Bytes in use
    #[serde(rename = "cstrg", default)]
    pub used: u64,
    /// Total bytes granted to the account
    #[serde(rename = "mstrg", default)]
    pub total: u64,
}

impl AccountQuota {
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

/// Response of the `us` (user session) login command.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "csid", default)]
    pub session_id: String,
    #[serde(rename = "u", default)]
    pub user_handle: String,
}

/// Response of the `g` command handing out a temporary download URL.
#[derive(Debug, Deserialize)]
pub struct DownloadUrlResponse {
    #[serde(rename = "g")]
    pub url: String,
    #[serde(rename = "s", default)]
    pub size: u64,
}

/// Response of the `u` command handing out a temporary upload URL.
#[derive(Debug, Deserialize)]
pub struct UploadUrlResponse {
    #[serde(rename = "p")]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_codes() {
        assert_eq!(NodeKind::from_i64(0), Some(NodeKind::File));
        assert_eq!(NodeKind::from_i64(2), Some(NodeKind::Root));
        assert_eq!(NodeKind::from_i64(4), Some(NodeKind::Trash));
        assert_eq!(NodeKind::from_i64(7), None);
    }

    #[test]
    fn test_protected_kinds() {
        assert!(NodeKind::Root.is_protected());
        assert!(NodeKind::Inbox.is_protected());
        assert!(NodeKind::Trash.is_protected());
        assert!(!NodeKind::Folder.is_protected());
        assert!(!NodeKind::File.is_protected());
    }

    #[test]
    fn test_raw_node_conversion() {
        let raw = RawNode {
            handle: "h1".to_string(),
            parent: "p1".to_string(),
            node_type: 0,
            attributes: String::new(),
            size: 42,
            timestamp: 1_700_000_000,
            owner: "u1".to_string(),
        };
        let node = raw.into_node("file.txt".to_string()).unwrap();
        assert_eq!(node.id, "h1");
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.size, 42);
        assert!(node.is_file());
    }

    #[test]
    fn test_quota_free() {
        let quota = AccountQuota { used: 30, total: 100 };
        assert_eq!(quota.free(), 70);
        let over = AccountQuota { used: 120, total: 100 };
        assert_eq!(over.free(), 0);
    }
}
