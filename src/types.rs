use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// A named grouping of items exposed by the catalog, typically one per
/// country or region.
#[derive(Debug, Clone, Deserialize)]
pub struct Collection {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl Collection {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Last-modified timestamp reduced to its date part.
    pub fn last_updated(&self) -> String {
        match &self.last_modified {
            Some(ts) => date_part(ts),
            None => "Unknown".to_string(),
        }
    }
}

/// One downloadable file reference attached to an item.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "file:size", default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
}

impl Asset {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// One dataset unit within a collection. Immutable once fetched; the
/// search result list owns items for the lifetime of one search.
///
/// Assets keep their stored key order — download resolution scans them in
/// order and must be deterministic across calls.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    #[serde(default)]
    pub assets: IndexMap<String, Asset>,
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(default)]
    pub geometry: Option<Value>,
}

impl CatalogItem {
    pub fn collection_id(&self) -> &str {
        self.collection.as_deref().unwrap_or("Unknown")
    }

    /// Age-sex structure items are bundled as archives and are resolved
    /// archive-first.
    pub fn is_archive_preferred(&self) -> bool {
        self.id.to_ascii_lowercase().contains("agesex")
    }

    pub fn file_type(&self) -> &'static str {
        if self.is_archive_preferred() {
            "ZIP"
        } else {
            "TIF"
        }
    }

    /// A property rendered for display: strings as-is, numbers bare,
    /// anything missing as "Unknown".
    pub fn property_display(&self, key: &str) -> String {
        match self.properties.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => other.to_string(),
            None => "Unknown".to_string(),
        }
    }

    /// The year property stringified; used both for display and as the
    /// subfolder name.
    pub fn year_string(&self) -> String {
        self.property_display("year")
    }

    /// Project name with the internal catalog prefix stripped.
    pub fn project_display(&self) -> String {
        self.property_display("project").replace("Global2_", "")
    }

    pub fn datetime_display(&self) -> String {
        match self.properties.get("datetime") {
            Some(Value::String(ts)) => date_part(ts),
            _ => "Unknown".to_string(),
        }
    }

    /// Approximate payload size for the results table. Age-sex items
    /// report the archive asset's size, others the item-level property.
    pub fn size_display(&self) -> String {
        if self.is_archive_preferred() {
            for (key, asset) in &self.assets {
                if key.to_ascii_lowercase().contains("arch") {
                    if let Some(size) = asset.size {
                        return size.to_string();
                    }
                }
            }
            "Unknown".to_string()
        } else {
            self.property_display("size")
        }
    }
}

fn date_part(ts: &str) -> String {
    match ts.split_once('T') {
        Some((date, _)) => date.to_string(),
        None => ts.to_string(),
    }
}

/// Ordered, duplicate-free set of items drawn from one search result
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    items: Vec<CatalogItem>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_all(results: &[CatalogItem]) -> Self {
        let mut selection = Self::new();
        for item in results {
            selection.add(item);
        }
        selection
    }

    pub fn contains(&self, item: &CatalogItem) -> bool {
        self.items
            .iter()
            .any(|i| i.id == item.id && i.collection == item.collection)
    }

    /// Appends unless already selected. Returns whether the item was added.
    pub fn add(&mut self, item: &CatalogItem) -> bool {
        if self.contains(item) {
            return false;
        }
        self.items.push(item.clone());
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Downloading,
    Complete,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Downloading => write!(f, "Downloading..."),
            JobStatus::Complete => write!(f, "Complete"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One selected item turned into a concrete piece of work. Built at run
/// start, discarded when the run ends.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub item_id: String,
    pub collection: String,
    pub year: String,
    /// Absent when no asset resolved; such a job fails without a network
    /// call.
    pub resolved_url: Option<String>,
    pub filename: String,
    pub local_path: PathBuf,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// All items were attempted.
    Completed,
    /// The user cancelled between items.
    Stopped,
}

/// Aggregate result of one pipeline run.
///
/// `downloaded + failed <= total` holds throughout a run; equality is
/// reached at termination unless the run was stopped early.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub state: RunState,
    pub jobs: Vec<DownloadJob>,
}

impl DownloadSummary {
    /// Wall-clock time as minutes and seconds.
    pub fn elapsed_display(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
