use super::auth;
use super::models::{
    CopyItemRequest, CopyParentReference, CreateFolderRequest, Drive, DriveItem, ItemCollection,
    Site, describe_error,
};
use crate::config::Config;
use crate::store::{ReportStore, StorageItem};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Microsoft Graph implementation of [`ReportStore`].
///
/// One bearer token for the whole run; every call is a blocking step in the
/// single-pass pipeline, so there is no retry or caching layer here.
pub struct GraphClient {
    client: Client,
    access_token: String,
}

impl GraphClient {
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent("avis-mirror/0.1.0")
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let access_token = auth::acquire_token(&client, config).await?;

        Ok(Self {
            client,
            access_token,
        })
    }

    /// Resolve a site's default document library to a drive id.
    pub async fn default_drive_id(&self, host: &str, site_name: &str) -> AppResult<String> {
        let site: Site = self
            .get_json(&format!(
                "{}/sites/{}:/sites/{}",
                GRAPH_API_BASE, host, site_name
            ))
            .await?;

        let drive: Drive = self
            .get_json(&format!("{}/sites/{}/drive", GRAPH_API_BASE, site.id))
            .await?;

        Ok(drive.id)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Graph request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Graph request failed: {} - {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Network(format!("Failed to parse Graph response: {}", e)))
    }

    fn item_from(&self, item: DriveItem, fallback_drive: &str) -> StorageItem {
        let (drive_id, parent_path) = match item.parent_reference {
            Some(parent) => (
                parent.drive_id.unwrap_or_else(|| fallback_drive.to_string()),
                parent.path.unwrap_or_default(),
            ),
            None => (fallback_drive.to_string(), String::new()),
        };

        StorageItem {
            drive_id,
            id: item.id,
            name: item.name,
            size: item.size.unwrap_or(0),
            is_folder: item.folder.is_some(),
            parent_path,
        }
    }
}

#[async_trait]
impl ReportStore for GraphClient {
    async fn get_by_path(&self, drive_id: &str, path: &str) -> AppResult<StorageItem> {
        let url = if path == "/" || path.is_empty() {
            format!("{}/drives/{}/root", GRAPH_API_BASE, drive_id)
        } else if path.starts_with('/') {
            format!("{}/drives/{}/root:{}", GRAPH_API_BASE, drive_id, path)
        } else {
            format!("{}/drives/{}/root:/{}", GRAPH_API_BASE, drive_id, path)
        };

        let item: DriveItem = self.get_json(&url).await?;
        Ok(self.item_from(item, drive_id))
    }

    async fn list_children(&self, folder: &StorageItem) -> AppResult<Vec<StorageItem>> {
        let mut items = Vec::new();
        let mut url = Some(format!(
            "{}/drives/{}/items/{}/children",
            GRAPH_API_BASE, folder.drive_id, folder.id
        ));

        while let Some(page_url) = url {
            let page: ItemCollection = self.get_json(&page_url).await?;
            items.extend(
                page.value
                    .into_iter()
                    .map(|item| self.item_from(item, &folder.drive_id)),
            );
            url = page.next_link;
        }

        Ok(items)
    }

    async fn find_children_by_name(
        &self,
        folder: &StorageItem,
        name: &str,
    ) -> AppResult<Vec<StorageItem>> {
        let url = format!(
            "{}/drives/{}/items/{}/children",
            GRAPH_API_BASE, folder.drive_id, folder.id
        );
        // OData string literals escape single quotes by doubling them.
        let filter = format!("name eq '{}'", name.replace('\'', "''"));

        let response = self
            .client
            .get(&url)
            .query(&[("$filter", filter.as_str())])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Graph request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Failed to query children of '{}': {} - {}",
                folder.name, status, error_text
            )));
        }

        let page: ItemCollection = response
            .json()
            .await
            .map_err(|e| AppError::Network(format!("Failed to parse Graph response: {}", e)))?;

        Ok(page
            .value
            .into_iter()
            .map(|item| self.item_from(item, &folder.drive_id))
            .collect())
    }

    async fn create_folder(&self, parent: &StorageItem, name: &str) -> AppResult<StorageItem> {
        let url = format!(
            "{}/drives/{}/items/{}/children",
            GRAPH_API_BASE, parent.drive_id, parent.id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&CreateFolderRequest::new(name))
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Graph request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Failed to create folder '{}': {} - {}",
                name, status, error_text
            )));
        }

        let item: DriveItem = response
            .json()
            .await
            .map_err(|e| AppError::Network(format!("Failed to parse Graph response: {}", e)))?;

        Ok(self.item_from(item, &parent.drive_id))
    }

    async fn download(&self, item: &StorageItem) -> AppResult<Vec<u8>> {
        let url = format!(
            "{}/drives/{}/items/{}/content",
            GRAPH_API_BASE, item.drive_id, item.id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Download request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Failed to download '{}': {} - {}",
                item.name, status, error_text
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read download body: {}", e)))?;

        Ok(bytes.to_vec())
    }

    async fn upload_new(&self, folder: &StorageItem, name: &str, bytes: Vec<u8>) -> AppResult<()> {
        let url = format!(
            "{}/drives/{}/items/{}:/{}:/content",
            GRAPH_API_BASE, folder.drive_id, folder.id, name
        );

        let response = self
            .client
            .put(&url)
            .query(&[("@microsoft.graph.conflictBehavior", "fail")])
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Upload request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Failed to upload '{}': {} - {}",
                name, status, error_text
            )));
        }

        Ok(())
    }

    async fn copy_item(&self, item: &StorageItem, dest: &StorageItem, name: &str) -> AppResult<()> {
        let url = format!(
            "{}/drives/{}/items/{}/copy",
            GRAPH_API_BASE, item.drive_id, item.id
        );

        let request = CopyItemRequest {
            parent_reference: CopyParentReference {
                drive_id: dest.drive_id.clone(),
                id: dest.id.clone(),
            },
            name: name.to_string(),
        };

        // Graph answers 202 Accepted with a monitor URL; a single-pass job
        // takes acceptance as success and never polls.
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Copy request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = describe_error(&response.text().await.unwrap_or_default());
            return Err(AppError::Storage(format!(
                "Failed to copy '{}': {} - {}",
                item.name, status, error_text
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odata_name_filter_escapes_quotes() {
        let filter = format!("name eq '{}'", "FY23 O'Hare Report".replace('\'', "''"));
        assert_eq!(filter, "name eq 'FY23 O''Hare Report'");
    }
}
