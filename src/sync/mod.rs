//! Selective sync pipeline
//!
//! Walks the source root's top-level children, selects fiscal-year Avis
//! report folders, and mirrors each one into the destination: items whose
//! name already exists at the destination are skipped, new spreadsheets are
//! normalized on the way across, and everything else is server-copied.

use crate::store::{ReportStore, StorageItem};
use crate::utils::error::{AppError, AppResult};
use crate::workbook::normalize_workbook;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, error, info};

const REPORT_FOLDER_PATTERN: &str = r"^FY\d\d Avis Reports?";
const SPREADSHEET_EXT: &str = ".xlsx";
/// Report sets from these vintages use the legacy workbook layout and must
/// never be rewritten.
const EXCLUDED_VINTAGES: [&str; 2] = ["FY19", "FY20"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub folders_processed: usize,
    pub items_normalized: usize,
    pub items_copied: usize,
    pub items_skipped: usize,
    pub items_failed: usize,
}

pub struct SyncEngine<'a> {
    store: &'a dyn ReportStore,
    report_pattern: Regex,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn ReportStore) -> AppResult<Self> {
        let report_pattern = Regex::new(REPORT_FOLDER_PATTERN)
            .map_err(|e| AppError::System(format!("Invalid report folder pattern: {}", e)))?;
        Ok(Self {
            store,
            report_pattern,
        })
    }

    /// Mirror every fiscal-year report folder under `source_root` into
    /// `dest_root`. Children that are not report folders are ignored.
    pub async fn run(
        &self,
        source_root: &StorageItem,
        dest_root: &StorageItem,
    ) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        let children = self
            .store
            .list_children(source_root)
            .await
            .context("Failed to list source folder")?;

        for child in children {
            if child.is_folder && self.report_pattern.is_match(&child.name) {
                self.mirror_report_folder(&child, dest_root, &mut summary)
                    .await
                    .with_context(|| {
                        format!("Failed to mirror report folder '{}'", child.name)
                    })?;
                summary.folders_processed += 1;
            }
        }

        Ok(summary)
    }

    /// Find the destination child folder with this exact name, or create it.
    /// When the listing returns several matches the last one enumerated wins;
    /// destination folder names are expected to be unique in practice.
    async fn locate_or_create(
        &self,
        dest_parent: &StorageItem,
        name: &str,
    ) -> AppResult<StorageItem> {
        let matches = self.store.find_children_by_name(dest_parent, name).await?;
        if let Some(existing) = matches.into_iter().last() {
            return Ok(existing);
        }
        self.store.create_folder(dest_parent, name).await
    }

    async fn mirror_report_folder(
        &self,
        source_folder: &StorageItem,
        dest_parent: &StorageItem,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let folder_name = &source_folder.name;

        let dest_folder = self
            .locate_or_create(dest_parent, folder_name)
            .await
            .with_context(|| format!("Failed to locate destination folder '{}'", folder_name))?;
        debug!("dest_folder '{}'", dest_folder.name);

        // Read-only snapshot of the destination's names, taken before the
        // item loop begins; items materialized during this run are not
        // re-indexed.
        let name_index: HashMap<String, StorageItem> = self
            .store
            .list_children(&dest_folder)
            .await
            .with_context(|| format!("Failed to list destination folder '{}'", folder_name))?
            .into_iter()
            .map(|child| (child.name.clone(), child))
            .collect();

        let items = self
            .store
            .list_children(source_folder)
            .await
            .with_context(|| format!("Failed to list source folder '{}'", folder_name))?;

        for item in items {
            if name_index.contains_key(&item.name) {
                summary.items_skipped += 1;
                continue;
            }

            debug!("copying '{}'", item.name);

            if wants_normalization(&item.name, folder_name) {
                self.normalize_item(&item, &dest_folder, summary).await?;
            } else {
                self.store
                    .copy_item(&item, &dest_folder, &item.name)
                    .await
                    .with_context(|| format!("Failed to copy '{}'", item.name))?;
                summary.items_copied += 1;
            }
        }

        Ok(())
    }

    /// Download, normalize and upload one spreadsheet. A failed or empty
    /// download skips the item; any failure after the download falls back to
    /// a byte-for-byte copy so the item always lands at the destination.
    async fn normalize_item(
        &self,
        item: &StorageItem,
        dest_folder: &StorageItem,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let bytes = match self.store.download(item).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                error!("download of {} returned no data", item.name);
                summary.items_failed += 1;
                return Ok(());
            }
            Err(e) => {
                error!("download of {} failed: {}", item.name, e);
                summary.items_failed += 1;
                return Ok(());
            }
        };

        match self.normalize_and_upload(&bytes, item, dest_folder).await {
            Ok(()) => {
                summary.items_normalized += 1;
            }
            Err(e) => {
                info!("transforming file {} failed ({}); copying instead", item.name, e);
                self.store
                    .copy_item(item, dest_folder, &item.name)
                    .await
                    .with_context(|| format!("Failed to copy '{}'", item.name))?;
                summary.items_copied += 1;
            }
        }

        Ok(())
    }

    async fn normalize_and_upload(
        &self,
        bytes: &[u8],
        item: &StorageItem,
        dest_folder: &StorageItem,
    ) -> AppResult<()> {
        let normalized = normalize_workbook(bytes)?;
        self.store
            .upload_new(dest_folder, &item.name, normalized)
            .await
    }
}

/// A new item is normalized iff it is a spreadsheet and its report set is not
/// one of the excluded legacy vintages.
fn wants_normalization(item_name: &str, folder_name: &str) -> bool {
    item_name.ends_with(SPREADSHEET_EXT)
        && !EXCLUDED_VINTAGES
            .iter()
            .any(|prefix| folder_name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Entry {
        id: String,
        name: String,
        is_folder: bool,
    }

    #[derive(Debug, Default, Clone)]
    struct Counters {
        downloads: usize,
        uploads: usize,
        copies: usize,
        creates: usize,
    }

    #[derive(Default)]
    struct FakeState {
        children: HashMap<String, Vec<Entry>>,
        contents: HashMap<String, Vec<u8>>,
        failing_downloads: HashSet<String>,
        counters: Counters,
        next_id: u32,
    }

    /// In-memory stand-in for the document store, with per-operation
    /// counters so tests can assert what a run actually did.
    #[derive(Default)]
    struct FakeStore {
        state: Mutex<FakeState>,
    }

    impl FakeStore {
        fn new_with_roots() -> (Self, StorageItem, StorageItem) {
            let store = Self::default();
            let source = store.new_root("source-root");
            let dest = store.new_root("dest-root");
            (store, source, dest)
        }

        fn new_root(&self, id: &str) -> StorageItem {
            let mut state = self.state.lock().unwrap();
            state.children.insert(id.to_string(), Vec::new());
            item(id, id, true)
        }

        fn add_folder(&self, parent: &StorageItem, name: &str) -> StorageItem {
            let mut state = self.state.lock().unwrap();
            let id = format!("folder-{}", state.next_id);
            state.next_id += 1;
            state.children.insert(id.clone(), Vec::new());
            state
                .children
                .get_mut(&parent.id)
                .expect("parent folder exists")
                .push(Entry {
                    id: id.clone(),
                    name: name.to_string(),
                    is_folder: true,
                });
            item(&id, name, true)
        }

        fn add_file(&self, parent: &StorageItem, name: &str, content: Vec<u8>) -> StorageItem {
            let mut state = self.state.lock().unwrap();
            let id = format!("file-{}", state.next_id);
            state.next_id += 1;
            state.contents.insert(id.clone(), content);
            state
                .children
                .get_mut(&parent.id)
                .expect("parent folder exists")
                .push(Entry {
                    id: id.clone(),
                    name: name.to_string(),
                    is_folder: false,
                });
            item(&id, name, false)
        }

        fn fail_downloads_of(&self, item: &StorageItem) {
            self.state
                .lock()
                .unwrap()
                .failing_downloads
                .insert(item.id.clone());
        }

        fn counters(&self) -> Counters {
            self.state.lock().unwrap().counters.clone()
        }

        fn child_names(&self, folder: &StorageItem) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.children[&folder.id]
                .iter()
                .map(|entry| entry.name.clone())
                .collect()
        }

        fn child_named(&self, folder: &StorageItem, name: &str) -> Option<StorageItem> {
            let state = self.state.lock().unwrap();
            state.children[&folder.id]
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| item(&entry.id, &entry.name, entry.is_folder))
        }

        fn content_of(&self, folder: &StorageItem, name: &str) -> Option<Vec<u8>> {
            let child = self.child_named(folder, name)?;
            self.state.lock().unwrap().contents.get(&child.id).cloned()
        }
    }

    fn item(id: &str, name: &str, is_folder: bool) -> StorageItem {
        StorageItem {
            drive_id: "fake-drive".to_string(),
            id: id.to_string(),
            name: name.to_string(),
            size: 0,
            is_folder,
            parent_path: String::new(),
        }
    }

    #[async_trait]
    impl ReportStore for FakeStore {
        async fn get_by_path(&self, _drive_id: &str, path: &str) -> AppResult<StorageItem> {
            Err(AppError::Storage(format!("No such path: {}", path)))
        }

        async fn list_children(&self, folder: &StorageItem) -> AppResult<Vec<StorageItem>> {
            let state = self.state.lock().unwrap();
            let children = state
                .children
                .get(&folder.id)
                .ok_or_else(|| AppError::Storage(format!("No such folder: {}", folder.id)))?;
            Ok(children
                .iter()
                .map(|entry| item(&entry.id, &entry.name, entry.is_folder))
                .collect())
        }

        async fn find_children_by_name(
            &self,
            folder: &StorageItem,
            name: &str,
        ) -> AppResult<Vec<StorageItem>> {
            Ok(self
                .list_children(folder)
                .await?
                .into_iter()
                .filter(|child| child.name == name)
                .collect())
        }

        async fn create_folder(
            &self,
            parent: &StorageItem,
            name: &str,
        ) -> AppResult<StorageItem> {
            let created = self.add_folder(parent, name);
            self.state.lock().unwrap().counters.creates += 1;
            Ok(created)
        }

        async fn download(&self, file: &StorageItem) -> AppResult<Vec<u8>> {
            let mut state = self.state.lock().unwrap();
            state.counters.downloads += 1;
            if state.failing_downloads.contains(&file.id) {
                return Err(AppError::Network("connection reset".to_string()));
            }
            state
                .contents
                .get(&file.id)
                .cloned()
                .ok_or_else(|| AppError::Storage(format!("No content for {}", file.name)))
        }

        async fn upload_new(
            &self,
            folder: &StorageItem,
            name: &str,
            bytes: Vec<u8>,
        ) -> AppResult<()> {
            if self.child_named(folder, name).is_some() {
                return Err(AppError::Storage(format!("'{}' already exists", name)));
            }
            self.add_file(folder, name, bytes);
            self.state.lock().unwrap().counters.uploads += 1;
            Ok(())
        }

        async fn copy_item(
            &self,
            file: &StorageItem,
            dest: &StorageItem,
            name: &str,
        ) -> AppResult<()> {
            let content = {
                let state = self.state.lock().unwrap();
                state.contents.get(&file.id).cloned().unwrap_or_default()
            };
            self.add_file(dest, name, content);
            self.state.lock().unwrap().counters.copies += 1;
            Ok(())
        }
    }

    fn open_ra_workbook() -> Vec<u8> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Open RA").unwrap();
        for (offset, header) in ["Station", "RA Number", "Status"].iter().enumerate() {
            sheet.write(2, 1 + offset as u16, *header).unwrap();
        }
        sheet.write(3, 1, "ABQ").unwrap();
        sheet.write(3, 2, "RA-1001").unwrap();
        sheet.write(3, 3, "open").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[tokio::test]
    async fn test_only_report_folders_are_selected() {
        let (store, source, dest) = FakeStore::new_with_roots();
        store.add_folder(&source, "FY23 Avis Report");
        store.add_folder(&source, "FY24 Avis Reports");
        store.add_folder(&source, "FY23 Other Report");
        store.add_folder(&source, "Avis Report");
        store.add_file(&source, "notes.txt", b"hello".to_vec());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.folders_processed, 2);
        let mut names = store.child_names(&dest);
        names.sort();
        assert_eq!(names, vec!["FY23 Avis Report", "FY24 Avis Reports"]);
    }

    #[tokio::test]
    async fn test_rerun_creates_no_duplicate_folders() {
        let (store, source, dest) = FakeStore::new_with_roots();
        store.add_folder(&source, "FY23 Avis Report");

        let engine = SyncEngine::new(&store).unwrap();
        engine.run(&source, &dest).await.unwrap();
        engine.run(&source, &dest).await.unwrap();

        assert_eq!(store.counters().creates, 1);
        assert_eq!(store.child_names(&dest), vec!["FY23 Avis Report"]);
    }

    #[tokio::test]
    async fn test_existing_destination_folder_is_reused() {
        let (store, source, dest) = FakeStore::new_with_roots();
        store.add_folder(&source, "FY23 Avis Report");
        store.add_folder(&dest, "FY23 Avis Report");

        let engine = SyncEngine::new(&store).unwrap();
        engine.run(&source, &dest).await.unwrap();

        assert_eq!(store.counters().creates, 0);
        assert_eq!(store.child_names(&dest), vec!["FY23 Avis Report"]);
    }

    #[tokio::test]
    async fn test_second_run_transfers_nothing() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY23 Avis Report");
        store.add_file(&folder, "summary.pdf", b"pdf".to_vec());
        store.add_file(&folder, "report.xlsx", open_ra_workbook());

        let engine = SyncEngine::new(&store).unwrap();
        let first = engine.run(&source, &dest).await.unwrap();
        assert_eq!(first.items_skipped, 0);

        let before = store.counters();
        let second = engine.run(&source, &dest).await.unwrap();
        let after = store.counters();

        assert_eq!(second.items_skipped, 2);
        assert_eq!(before.downloads, after.downloads);
        assert_eq!(before.uploads, after.uploads);
        assert_eq!(before.copies, after.copies);
    }

    #[tokio::test]
    async fn test_spreadsheet_is_normalized_on_the_way_across() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY23 Avis Report");
        let original = open_ra_workbook();
        store.add_file(&folder, "report.xlsx", original.clone());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_normalized, 1);
        assert_eq!(summary.items_copied, 0);

        let dest_folder = store.child_named(&dest, "FY23 Avis Report").unwrap();
        let copied = store.content_of(&dest_folder, "report.xlsx").unwrap();
        assert_ne!(copied, original);

        // the uploaded workbook now carries the table part
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(copied)).unwrap();
        assert!(archive.by_name("xl/tables/table1.xml").is_ok());
    }

    #[tokio::test]
    async fn test_legacy_vintage_is_copied_untouched() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY19 Avis Report");
        let original = open_ra_workbook();
        store.add_file(&folder, "report.xlsx", original.clone());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_normalized, 0);
        assert_eq!(summary.items_copied, 1);
        assert_eq!(store.counters().downloads, 0);

        let dest_folder = store.child_named(&dest, "FY19 Avis Report").unwrap();
        assert_eq!(
            store.content_of(&dest_folder, "report.xlsx").unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn test_unparseable_workbook_falls_back_to_exact_copy() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY23 Avis Report");
        let original = b"not really a workbook".to_vec();
        store.add_file(&folder, "report.xlsx", original.clone());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_normalized, 0);
        assert_eq!(summary.items_copied, 1);
        assert_eq!(store.counters().uploads, 0);

        let dest_folder = store.child_named(&dest, "FY23 Avis Report").unwrap();
        assert_eq!(
            store.content_of(&dest_folder, "report.xlsx").unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn test_failed_download_skips_the_item() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY23 Avis Report");
        let file = store.add_file(&folder, "report.xlsx", open_ra_workbook());
        store.fail_downloads_of(&file);

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.items_copied, 0);
        assert_eq!(summary.items_normalized, 0);

        let dest_folder = store.child_named(&dest, "FY23 Avis Report").unwrap();
        assert!(store.child_named(&dest_folder, "report.xlsx").is_none());
    }

    #[tokio::test]
    async fn test_empty_download_skips_the_item() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY23 Avis Report");
        store.add_file(&folder, "report.xlsx", Vec::new());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_failed, 1);
        let dest_folder = store.child_named(&dest, "FY23 Avis Report").unwrap();
        assert!(store.child_named(&dest_folder, "report.xlsx").is_none());
    }

    #[tokio::test]
    async fn test_non_spreadsheet_items_are_plain_copied() {
        let (store, source, dest) = FakeStore::new_with_roots();
        let folder = store.add_folder(&source, "FY24 Avis Reports");
        store.add_file(&folder, "summary.pdf", b"pdf bytes".to_vec());

        let engine = SyncEngine::new(&store).unwrap();
        let summary = engine.run(&source, &dest).await.unwrap();

        assert_eq!(summary.items_copied, 1);
        assert_eq!(store.counters().downloads, 0);
    }

    #[test]
    fn test_report_folder_pattern() {
        let pattern = Regex::new(REPORT_FOLDER_PATTERN).unwrap();
        assert!(pattern.is_match("FY23 Avis Report"));
        assert!(pattern.is_match("FY24 Avis Reports"));
        assert!(pattern.is_match("FY24 Avis Reports (archived)"));
        assert!(!pattern.is_match("FY23 Other Report"));
        assert!(!pattern.is_match("Avis Report"));
        assert!(!pattern.is_match("FY2023 Avis Report"));
    }

    #[test]
    fn test_classification_rule() {
        assert!(wants_normalization("report.xlsx", "FY23 Avis Report"));
        assert!(!wants_normalization("report.xlsx", "FY19 Avis Report"));
        assert!(!wants_normalization("report.xlsx", "FY20 Avis Reports"));
        assert!(!wants_normalization("report.pdf", "FY23 Avis Report"));
        assert!(!wants_normalization("report.XLSX", "FY23 Avis Report"));
    }
}
