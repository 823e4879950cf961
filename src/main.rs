use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tokio::sync::mpsc;

use worldpop_downloader::api::{CatalogClient, SearchParams};
use worldpop_downloader::cli::{Cli, Command, QueryArgs};
use worldpop_downloader::config::Config;
use worldpop_downloader::downloader::{Downloader, PipelineEvent};
use worldpop_downloader::filter::{FacetSelection, FILTER_LANG};
use worldpop_downloader::types::{CatalogItem, DownloadSummary, JobStatus, RunState, Selection};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting WorldPop catalog downloader");

    let cli = Cli::parse();
    match cli.command {
        Command::Collections { filter } => {
            let config = Config {
                base_url: cli.base_url,
                ..Config::default()
            };
            run_collections(&CatalogClient::new(&config), filter.as_deref()).await
        }
        Command::Search { query } => {
            let config = Config {
                base_url: cli.base_url,
                limit: query.limit,
                ..Config::default()
            };
            run_search(&CatalogClient::new(&config), &query).await
        }
        Command::Download {
            query,
            output_dir,
            subfolders,
            ids,
            chunk_size,
        } => {
            let config = Config {
                base_url: cli.base_url,
                download_dir: output_dir.unwrap_or_else(Config::default_download_dir),
                create_subfolders: subfolders,
                chunk_size,
                limit: query.limit,
                ..Config::default()
            };
            run_download(config, &query, &ids).await
        }
    }
}

async fn run_collections(client: &CatalogClient, filter: Option<&str>) -> Result<()> {
    let collections = client.get_collections().await;
    if collections.is_empty() {
        // An empty listing also covers a failed request; the client has
        // already logged any error.
        println!("{}", "No collections returned".yellow());
        return Ok(());
    }

    let term = filter.map(str::to_lowercase);
    let mut shown: Vec<_> = collections
        .iter()
        .filter(|c| match &term {
            Some(term) => {
                c.display_title().to_lowercase().contains(term)
                    || c.id.to_lowercase().contains(term)
            }
            None => true,
        })
        .collect();
    shown.sort_by_key(|c| c.display_title().to_lowercase());

    println!("{}", format!("{} collections", shown.len()).bold());
    println!("{:<12} {:<44} {}", "ID", "TITLE", "LAST UPDATED");
    for collection in shown {
        println!(
            "{:<12} {:<44} {}",
            collection.id,
            collection.display_title(),
            collection.last_updated()
        );
    }
    Ok(())
}

fn build_search_params(query: &QueryArgs) -> SearchParams {
    let facets = FacetSelection {
        years: query.years.clone(),
        resolutions: query.resolutions.clone(),
        projects: query.projects.clone(),
    };
    let filter = facets.to_cql2();
    let filter_lang = filter.is_some().then(|| FILTER_LANG.to_string());

    SearchParams {
        limit: query.limit,
        collections: Some(query.collections.clone()),
        bbox: query.bbox.clone(),
        datetime: query.datetime.clone(),
        query: None,
        filter,
        filter_lang,
    }
}

async fn search(client: &CatalogClient, query: &QueryArgs) -> Vec<CatalogItem> {
    let params = build_search_params(query);

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Searching...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    let results = client.search_items(&params).await;
    spinner.finish_and_clear();

    if results.is_empty() {
        println!("{}", "Found 0 items".yellow());
    } else {
        println!("{}", format!("Found {} items", results.len()).green());
    }
    results
}

async fn run_search(client: &CatalogClient, query: &QueryArgs) -> Result<()> {
    let results = search(client, query).await;
    if results.is_empty() {
        return Ok(());
    }

    println!(
        "{:<10} {:<36} {:>6} {:<10} {:<24} {:<4} {:>12} {}",
        "COLLECTION", "ITEM", "YEAR", "RESOLUTION", "PROJECT", "TYPE", "SIZE", "UPDATED"
    );
    for item in &results {
        println!(
            "{:<10} {:<36} {:>6} {:<10} {:<24} {:<4} {:>12} {}",
            item.collection_id(),
            item.id,
            item.year_string(),
            item.property_display("resolution"),
            item.project_display(),
            item.file_type(),
            item.size_display(),
            item.datetime_display()
        );
    }
    Ok(())
}

async fn run_download(config: Config, query: &QueryArgs, ids: &[String]) -> Result<()> {
    let client = CatalogClient::new(&config);
    let results = search(&client, query).await;

    let selection = if ids.is_empty() {
        Selection::select_all(&results)
    } else {
        let mut selection = Selection::new();
        for id in ids {
            match results.iter().find(|item| &item.id == id) {
                Some(item) => {
                    selection.add(item);
                }
                None => eprintln!(
                    "{}",
                    format!("Item {} is not in the search results; skipping", id).yellow()
                ),
            }
        }
        selection
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{}", "Stopping after the current file...".yellow());
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let (events, mut rx) = mpsc::unbounded_channel();
    let downloader = Downloader::new(client, config, cancel, events);
    let worker = tokio::spawn(async move { downloader.run(&selection).await });

    // Foreground: render immutable event snapshots; the worker owns all
    // run state.
    let mut bar: Option<ProgressBar> = None;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::RunStarted { total } => {
                let pb = ProgressBar::new(total as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}/{len}",
                        )
                        .unwrap()
                        .progress_chars("#>-"),
                );
                bar = Some(pb);
            }
            PipelineEvent::FileStarted { filename, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("Downloading {}", filename));
                }
            }
            PipelineEvent::JobStatus {
                filename, status, ..
            } => {
                if let Some(pb) = &bar {
                    match status {
                        JobStatus::Complete => {
                            pb.println(format!("{} {}", "✓".green(), filename));
                            pb.inc(1);
                        }
                        JobStatus::Failed => {
                            pb.println(format!("{} {}", "✗".red(), filename));
                            pb.inc(1);
                        }
                        JobStatus::Pending | JobStatus::Downloading => {}
                    }
                }
            }
            PipelineEvent::RunFinished { .. } => {
                if let Some(pb) = &bar {
                    pb.finish_and_clear();
                }
            }
        }
    }

    let summary = worker.await??;
    print_summary(&summary);

    if summary.state == RunState::Completed && summary.failed > 0 {
        anyhow::bail!("{} of {} downloads failed", summary.failed, summary.total);
    }
    Ok(())
}

fn print_summary(summary: &DownloadSummary) {
    println!("\n{}", "Download Summary:".bold());
    println!("Total files: {}", summary.total);
    println!("Downloaded: {}", summary.downloaded.to_string().green());
    println!("Failed: {}", summary.failed.to_string().red());
    println!("Time: {}", summary.elapsed_display());

    if summary.failed > 0 {
        println!("\n{}", "Failed Downloads:".red().bold());
        for job in summary
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
        {
            println!("✗ {} ({})", job.filename.red(), job.item_id);
        }
    }

    match summary.state {
        RunState::Stopped => println!("\n{}", "Download stopped by user".yellow()),
        RunState::Completed if summary.downloaded == summary.total => {
            println!("\n{}", "All downloads completed!".green())
        }
        RunState::Completed if summary.downloaded > 0 => println!(
            "\nDownloaded {}/{} files",
            summary.downloaded, summary.total
        ),
        RunState::Completed => println!("\n{}", "Download failed".red()),
    }
}
