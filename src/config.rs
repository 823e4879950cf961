use std::env;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.stac.worldpop.org";

/// Environment variable holding the optional bearer token for the API.
pub const API_KEY_ENV: &str = "WORLDPOP_API_KEY";

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// High enough to return every matching item in a single request; the
/// catalog is small and the client does not paginate.
pub const DEFAULT_SEARCH_LIMIT: usize = 10_000;

pub const MIN_YEAR: i64 = 2015;
pub const MAX_YEAR: i64 = 2030;

pub const AVAILABLE_RESOLUTIONS: [&str; 2] = ["100m", "1km"];
pub const AVAILABLE_PROJECTS: [&str; 2] = ["Population", "Age and Sex Structures"];

/// Settings consumed by the catalog client and the download pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    /// Empty means unauthenticated.
    pub api_key: String,
    pub download_dir: PathBuf,
    /// Lay downloads out as `{collection}/{year}` subfolders.
    pub create_subfolders: bool,
    pub chunk_size: usize,
    pub limit: usize,
}

impl Config {
    pub fn default_download_dir() -> PathBuf {
        dirs::download_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("WorldPop_Data")
    }

    pub fn api_key_from_env() -> String {
        env::var(API_KEY_ENV).unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: Self::api_key_from_env(),
            download_dir: Self::default_download_dir(),
            create_subfolders: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}
