//! The selection-and-download pipeline: turns a confirmed selection into
//! files on disk, one sequential transfer at a time, with observable
//! progress and cooperative cancellation at item boundaries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::api::CatalogClient;
use crate::config::Config;
use crate::error::DownloaderError;
use crate::types::{CatalogItem, DownloadJob, DownloadSummary, JobStatus, RunState, Selection};

/// Progress notifications crossing the worker/foreground boundary. Values
/// are immutable snapshots; the consumer never shares state with the run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        total: usize,
    },
    /// Emitted before each transfer begins. `fraction` is the share of
    /// items already attempted, not byte progress.
    FileStarted {
        index: usize,
        total: usize,
        fraction: f64,
        filename: String,
    },
    JobStatus {
        index: usize,
        item_id: String,
        filename: String,
        status: JobStatus,
    },
    RunFinished {
        summary: DownloadSummary,
    },
}

/// Resolves the download URL and local filename for one item.
///
/// Age-sex items prefer their bundled archive: the first asset, in stored
/// order, whose roles contain "archive" or whose key contains "arch" wins,
/// and the scan stops there even when that asset has no href. Items that
/// miss (and all other items) take the first asset with role "data".
pub fn resolve_asset(item: &CatalogItem) -> (Option<String>, String) {
    let mut url: Option<String> = None;
    let mut filename = format!("{}.tif", item.id);

    if item.is_archive_preferred() {
        for (key, asset) in &item.assets {
            if asset.has_role("archive") || key.to_ascii_lowercase().contains("arch") {
                url = asset.href.clone();
                if let Some(href) = &url {
                    filename = match href.rsplit_once('/') {
                        Some((_, name)) => name.to_string(),
                        None => format!("{}_archive.zip", item.id),
                    };
                }
                break;
            }
        }
        if url.is_none() {
            if let Some((data_url, data_name)) = first_data_asset(item) {
                url = Some(data_url);
                if let Some(name) = data_name {
                    filename = name;
                }
            }
        }
    } else if let Some((data_url, data_name)) = first_data_asset(item) {
        url = Some(data_url);
        if let Some(name) = data_name {
            filename = name;
        }
    }

    (url, filename)
}

/// First asset with role "data", in stored order; the scan stops at the
/// first such asset whether or not it carries an href. Returns the href
/// and, when it splits on '/', the trailing filename.
fn first_data_asset(item: &CatalogItem) -> Option<(String, Option<String>)> {
    for asset in item.assets.values() {
        if asset.has_role("data") {
            let href = asset.href.clone()?;
            let name = href.rsplit_once('/').map(|(_, name)| name.to_string());
            return Some((href, name));
        }
    }
    None
}

/// Builds one job per selected item, in selection order.
pub fn build_jobs(selection: &Selection, config: &Config) -> Vec<DownloadJob> {
    selection
        .items()
        .iter()
        .map(|item| {
            let (resolved_url, filename) = resolve_asset(item);
            let local_path = target_path(config, item, &filename);
            DownloadJob {
                item_id: item.id.clone(),
                collection: item.collection_id().to_string(),
                year: item.year_string(),
                resolved_url,
                filename,
                local_path,
                status: JobStatus::Pending,
            }
        })
        .collect()
}

fn target_path(config: &Config, item: &CatalogItem, filename: &str) -> PathBuf {
    if config.create_subfolders {
        config
            .download_dir
            .join(item.collection_id())
            .join(item.year_string())
            .join(filename)
    } else {
        config.download_dir.join(filename)
    }
}

pub struct Downloader {
    client: CatalogClient,
    config: Config,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<PipelineEvent>,
}

impl Downloader {
    pub fn new(
        client: CatalogClient,
        config: Config,
        cancel: Arc<AtomicBool>,
        events: UnboundedSender<PipelineEvent>,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
            events,
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // A dropped receiver only mutes progress reporting.
        let _ = self.events.send(event);
    }

    fn emit_status(&self, index: usize, job: &DownloadJob) {
        self.emit(PipelineEvent::JobStatus {
            index,
            item_id: job.item_id.clone(),
            filename: job.filename.clone(),
            status: job.status,
        });
    }

    /// Executes one run over the selection. Refuses to start on an empty
    /// selection or an uncreatable download directory; past that point no
    /// single item failure is ever fatal, and the only early exit is the
    /// cancellation flag, polled between items.
    pub async fn run(&self, selection: &Selection) -> Result<DownloadSummary, DownloaderError> {
        if selection.is_empty() {
            return Err(DownloaderError::EmptySelection);
        }
        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| DownloaderError::DownloadDir {
                path: self.config.download_dir.clone(),
                source: e,
            })?;

        let mut jobs = build_jobs(selection, &self.config);
        let total = jobs.len();
        let start = Instant::now();
        let mut downloaded = 0usize;
        let mut failed = 0usize;
        let mut state = RunState::Completed;

        info!("Starting download run: {} files", total);
        self.emit(PipelineEvent::RunStarted { total });

        for index in 0..total {
            if self.cancel.load(Ordering::SeqCst) {
                state = RunState::Stopped;
                info!("Download run stopped after {} of {} files", index, total);
                break;
            }

            let Some(url) = jobs[index].resolved_url.clone() else {
                jobs[index].status = JobStatus::Failed;
                failed += 1;
                warn!("No downloadable asset for item {}", jobs[index].item_id);
                self.emit_status(index, &jobs[index]);
                continue;
            };

            self.emit(PipelineEvent::FileStarted {
                index,
                total,
                fraction: index as f64 / total as f64,
                filename: jobs[index].filename.clone(),
            });
            jobs[index].status = JobStatus::Downloading;
            self.emit_status(index, &jobs[index]);

            if let Some(parent) = jobs[index].local_path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Cannot create directory {}: {}", parent.display(), e);
                    jobs[index].status = JobStatus::Failed;
                    failed += 1;
                    self.emit_status(index, &jobs[index]);
                    continue;
                }
            }

            // Per-file byte progress stays on the client callback; the
            // aggregate view tracks whole files only.
            let ok = self
                .client
                .download_file(&url, &jobs[index].local_path, None)
                .await;

            if ok {
                jobs[index].status = JobStatus::Complete;
                downloaded += 1;
            } else {
                jobs[index].status = JobStatus::Failed;
                failed += 1;
            }
            self.emit_status(index, &jobs[index]);
        }

        let summary = DownloadSummary {
            total,
            downloaded,
            failed,
            elapsed: start.elapsed(),
            state,
            jobs,
        };
        info!(
            "Download run finished: {}/{} downloaded, {} failed, {}",
            summary.downloaded,
            summary.total,
            summary.failed,
            summary.elapsed_display()
        );
        self.emit(PipelineEvent::RunFinished {
            summary: summary.clone(),
        });
        Ok(summary)
    }
}
