use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{
    AVAILABLE_PROJECTS, AVAILABLE_RESOLUTIONS, DEFAULT_BASE_URL, DEFAULT_CHUNK_SIZE,
    DEFAULT_SEARCH_LIMIT, MAX_YEAR, MIN_YEAR,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog API base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List catalog collections
    Collections {
        /// Substring match on collection title or id
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Search for items and print the result table
    Search {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Search for items and download their data files
    Download {
        #[command(flatten)]
        query: QueryArgs,

        /// Output directory (defaults to the platform download folder)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Lay files out as {collection}/{year} subfolders
        #[arg(long)]
        subfolders: bool,

        /// Download only these item ids from the search results (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Transfer chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Collection ids to search (repeatable)
    #[arg(short, long = "collection", required = true)]
    pub collections: Vec<String>,

    /// Filter by year (repeatable)
    #[arg(short, long = "year", value_parser = clap::value_parser!(i64).range(MIN_YEAR..=MAX_YEAR))]
    pub years: Vec<i64>,

    /// Filter by resolution (repeatable)
    #[arg(long = "resolution", value_parser = PossibleValuesParser::new(AVAILABLE_RESOLUTIONS))]
    pub resolutions: Vec<String>,

    /// Filter by project (repeatable)
    #[arg(long = "project", value_parser = PossibleValuesParser::new(AVAILABLE_PROJECTS))]
    pub projects: Vec<String>,

    /// Bounding box filter
    #[arg(long, num_args = 4, value_names = ["WEST", "SOUTH", "EAST", "NORTH"], allow_negative_numbers = true)]
    pub bbox: Option<Vec<f64>>,

    /// Datetime instant or interval (RFC 3339)
    #[arg(long)]
    pub datetime: Option<String>,

    /// Maximum items returned by the single search request
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub limit: usize,
}
