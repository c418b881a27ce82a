//! Storage capability seam consumed by the sync pipeline
//!
//! The pipeline never talks to a backend directly; everything it needs from
//! the document store goes through [`ReportStore`], so the Graph client and
//! the in-memory test store are interchangeable.

use crate::utils::error::AppResult;
use async_trait::async_trait;

/// Handle to a file or folder in the remote store.
///
/// Held transiently by the pipeline; fetched fresh on every run and never
/// persisted locally.
#[derive(Debug, Clone)]
pub struct StorageItem {
    pub drive_id: String,
    pub id: String,
    pub name: String,
    pub size: u64,
    pub is_folder: bool,
    pub parent_path: String,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Resolve an absolute slash-separated path to an item handle.
    async fn get_by_path(&self, drive_id: &str, path: &str) -> AppResult<StorageItem>;

    /// List a folder's immediate children. Ordering is whatever the backend
    /// returns.
    async fn list_children(&self, folder: &StorageItem) -> AppResult<Vec<StorageItem>>;

    /// Server-side filter for children with an exact name match.
    async fn find_children_by_name(
        &self,
        folder: &StorageItem,
        name: &str,
    ) -> AppResult<Vec<StorageItem>>;

    /// Create a child folder under `parent`.
    async fn create_folder(&self, parent: &StorageItem, name: &str) -> AppResult<StorageItem>;

    /// Fetch the full byte content of a file item.
    async fn download(&self, item: &StorageItem) -> AppResult<Vec<u8>>;

    /// Upload `bytes` as a new file named `name` under `folder`. Fails if an
    /// item with that name already exists; never overwrites.
    async fn upload_new(&self, folder: &StorageItem, name: &str, bytes: Vec<u8>) -> AppResult<()>;

    /// Server-side copy of `item` into `dest` under `name`, without a local
    /// round-trip.
    async fn copy_item(&self, item: &StorageItem, dest: &StorageItem, name: &str) -> AppResult<()>;
}
