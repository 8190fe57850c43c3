//! MEGA API service layer
//!
//! Wire models, the JSON command transport and the storage client trait
//! consumed by the virtual filesystem.

pub mod client;
pub mod http_client;
pub mod models;

pub use client::{MegaClient, StorageClient};
pub use models::{AccountQuota, MegaNode, NodeKind};
