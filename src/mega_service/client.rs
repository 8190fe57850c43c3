use crate::mega_service::http_client::HttpClient;
use crate::mega_service::models::{
    AccountQuota, DownloadUrlResponse, FetchNodesResponse, LoginResponse, MegaNode,
    NodeAttributes, UploadUrlResponse,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, info};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::RwLock;

/// Remote storage operations consumed by the virtual filesystem.
///
/// The filesystem core treats the account as a flat node listing plus a
/// handful of mutation primitives; everything session- and wire-related
/// stays behind this trait.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Enumerate every node of the account as a flat list.
    async fn fetch_nodes(&self) -> Result<Vec<MegaNode>>;

    /// Account storage quota (used/total bytes).
    async fn quota(&self) -> Result<AccountQuota>;

    /// Create a folder under the given parent node.
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<()>;

    /// Delete a node. `permanent` bypasses the trash and is irreversible;
    /// otherwise containers are removed recursively into the trash.
    async fn delete_node(&self, node_id: &str, permanent: bool) -> Result<()>;

    /// Move a node under a new parent.
    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<()>;

    /// Rename a node in place.
    async fn rename_node(&self, node_id: &str, new_name: &str) -> Result<()>;

    /// Download the full content of a file node into memory.
    async fn download(&self, node: &MegaNode) -> Result<Vec<u8>>;

    /// Download the full content of a file node to a local path.
    async fn download_to_path(&self, node: &MegaNode, target: &Path) -> Result<()>;

    /// Upload a complete file under the given parent, replacing any
    /// same-named sibling.
    async fn upload(&self, parent_id: &str, name: &str, data: Vec<u8>) -> Result<()>;
}

/// MEGA API client speaking the JSON command protocol.
pub struct MegaClient {
    http: HttpClient,
    session: RwLock<Option<String>>,
}

impl MegaClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            session: RwLock::new(None),
        }
    }

    pub fn with_http(http: HttpClient) -> Self {
        Self {
            http,
            session: RwLock::new(None),
        }
    }

    /// Log in with email and password, retaining the session id for all
    /// subsequent commands.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .http
            .command(
                json!({
                    "a": "us",
                    "user": email.to_lowercase(),
                    "uh": Self::login_digest(email, password),
                }),
                None,
            )
            .await
            .context("Login failed")?;

        let login: LoginResponse =
            serde_json::from_value(response).context("Malformed login response")?;
        if login.session_id.is_empty() {
            return Err(anyhow!("Login did not yield a session id"));
        }
        info!("Logged in as {} (user {})", email, login.user_handle);
        *self.session.write().unwrap() = Some(login.session_id);
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.read().unwrap().is_some()
    }

    /// Drop the server-side session.
    pub async fn logout(&self) -> Result<()> {
        let sid = self.session.write().unwrap().take();
        if let Some(sid) = sid {
            self.http.command(json!({"a": "sml"}), Some(&sid)).await?;
            info!("Logged out");
        }
        Ok(())
    }

    fn session_id(&self) -> Result<String> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("Not logged in"))
    }

    /// Deterministic login digest over the lowercased email and the
    /// password-derived key.
    fn login_digest(email: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let key = hasher.finalize();

        let mut hasher = Sha256::new();
        hasher.update(email.to_lowercase().as_bytes());
        hasher.update(key);
        let digest = hasher.finalize();
        URL_SAFE_NO_PAD.encode(&digest[..16])
    }

    /// Decode the base64 attribute block (`MEGA{"n":...}`) into a name.
    fn decode_name(attributes: &str, handle: &str) -> String {
        let decoded = match URL_SAFE_NO_PAD.decode(attributes) {
            Ok(bytes) => bytes,
            Err(_) => return handle.to_string(),
        };
        let text = String::from_utf8_lossy(&decoded);
        let json_part = text.strip_prefix("MEGA").unwrap_or(&text);
        match serde_json::from_str::<NodeAttributes>(json_part) {
            Ok(attrs) if !attrs.name.is_empty() => attrs.name,
            _ => handle.to_string(),
        }
    }

    fn encode_name(name: &str) -> String {
        let block = format!("MEGA{}", json!({ "n": name }));
        URL_SAFE_NO_PAD.encode(block.as_bytes())
    }
}

impl Default for MegaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for MegaClient {
    async fn fetch_nodes(&self) -> Result<Vec<MegaNode>> {
        let sid = self.session_id()?;
        let response = self
            .http
            .command(json!({"a": "f", "c": 1}), Some(&sid))
            .await
            .context("Failed to fetch node listing")?;

        let listing: FetchNodesResponse =
            serde_json::from_value(response).context("Malformed node listing")?;

        let nodes = listing
            .nodes
            .into_iter()
            .filter_map(|raw| {
                let name = match raw.node_type {
                    // Containers above the cloud root carry no attributes.
                    2 => "Cloud Drive".to_string(),
                    3 => "Inbox".to_string(),
                    4 => "Trash".to_string(),
                    _ => Self::decode_name(&raw.attributes, &raw.handle),
                };
                raw.into_node(name)
            })
            .collect::<Vec<_>>();
        debug!("Fetched {} nodes", nodes.len());
        Ok(nodes)
    }

    async fn quota(&self) -> Result<AccountQuota> {
        let sid = self.session_id()?;
        let response = self
            .http
            .command(json!({"a": "uq", "strg": 1, "xfer": 1}), Some(&sid))
            .await
            .context("Failed to query account quota")?;
        serde_json::from_value(response).context("Malformed quota response")
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<()> {
        let sid = self.session_id()?;
        self.http
            .command(
                json!({
                    "a": "p",
                    "t": parent_id,
                    "n": [{"h": "xxxxxxxx", "t": 1, "a": Self::encode_name(name)}],
                }),
                Some(&sid),
            )
            .await
            .with_context(|| format!("Failed to create folder '{}'", name))?;
        Ok(())
    }

    async fn delete_node(&self, node_id: &str, permanent: bool) -> Result<()> {
        let sid = self.session_id()?;
        self.http
            .command(
                json!({"a": "d", "n": node_id, "v": if permanent { 1 } else { 0 }}),
                Some(&sid),
            )
            .await
            .with_context(|| format!("Failed to delete node {}", node_id))?;
        Ok(())
    }

    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<()> {
        let sid = self.session_id()?;
        self.http
            .command(json!({"a": "m", "n": node_id, "t": new_parent_id}), Some(&sid))
            .await
            .with_context(|| format!("Failed to move node {}", node_id))?;
        Ok(())
    }

    async fn rename_node(&self, node_id: &str, new_name: &str) -> Result<()> {
        let sid = self.session_id()?;
        self.http
            .command(
                json!({"a": "a", "n": node_id, "at": Self::encode_name(new_name)}),
                Some(&sid),
            )
            .await
            .with_context(|| format!("Failed to rename node {}", node_id))?;
        Ok(())
    }

    async fn download(&self, node: &MegaNode) -> Result<Vec<u8>> {
        let sid = self.session_id()?;
        let response = self
            .http
            .command(json!({"a": "g", "g": 1, "n": node.id}), Some(&sid))
            .await
            .with_context(|| format!("Failed to resolve download URL for {}", node.id))?;
        let target: DownloadUrlResponse =
            serde_json::from_value(response).context("Malformed download response")?;
        self.http
            .get_bytes(&target.url)
            .await
            .with_context(|| format!("Failed to download content of {}", node.id))
    }

    async fn download_to_path(&self, node: &MegaNode, target: &Path) -> Result<()> {
        let data = self.download(node).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create cache directory")?;
        }
        tokio::fs::write(target, data)
            .await
            .with_context(|| format!("Failed to write cache file {}", target.display()))
    }

    async fn upload(&self, parent_id: &str, name: &str, data: Vec<u8>) -> Result<()> {
        let sid = self.session_id()?;
        let response = self
            .http
            .command(json!({"a": "u", "s": data.len()}), Some(&sid))
            .await
            .context("Failed to open upload session")?;
        let target: UploadUrlResponse =
            serde_json::from_value(response).context("Malformed upload response")?;

        let token = self
            .http
            .put_bytes(&target.url, data)
            .await
            .context("Failed to upload content")?;

        self.http
            .command(
                json!({
                    "a": "p",
                    "t": parent_id,
                    "n": [{"h": token, "t": 0, "a": Self::encode_name(name)}],
                }),
                Some(&sid),
            )
            .await
            .with_context(|| format!("Failed to commit upload of '{}'", name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_digest_is_stable() {
        let a = MegaClient::login_digest("User@Example.com", "secret");
        let b = MegaClient::login_digest("user@example.com", "secret");
        assert_eq!(a, b);
        assert_ne!(a, MegaClient::login_digest("user@example.com", "other"));
    }

    #[test]
    fn test_name_codec_roundtrip() {
        let encoded = MegaClient::encode_name("report.pdf");
        assert_eq!(MegaClient::decode_name(&encoded, "h1"), "report.pdf");
    }

    #[test]
    fn test_decode_name_falls_back_to_handle() {
        assert_eq!(MegaClient::decode_name("!!!", "h1"), "h1");
        assert_eq!(MegaClient::decode_name("", "h2"), "h2");
    }
}
