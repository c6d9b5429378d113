//! Configuration loading and root folder resolution

use crate::db::get_setting;
use crate::{Error, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("phrasefind").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    let system_config = PathBuf::from("/etc/phrasefind/config.toml");
    if system_config.exists() {
        return Ok(system_config);
    }

    Err(Error::Config("No config file found".to_string()))
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("phrasefind"))
        .unwrap_or_else(|| PathBuf::from("./phrasefind_data"))
}

/// Service configuration loaded from the settings table.
///
/// Defaults are seeded at database init; this loader falls back to the same
/// defaults when a row is missing or unparseable.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_concurrent_jobs: usize,
    pub job_poll_interval_ms: u64,
    pub job_timeout_minutes: u64,
    pub search_results_per_strategy: u32,
    pub search_max_candidates: usize,
    pub transcribe_chunk_seconds: u32,
    pub transcribe_max_chunks: u32,
    pub segment_end_padding_seconds: f64,
    pub english_min_function_words: usize,
    pub english_max_nonascii_ratio: f64,
    pub stream_capacity: usize,
    pub free_requests_per_window: i64,
    pub free_window_minutes: i64,
    pub subscription_cache_minutes: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            job_poll_interval_ms: 2000,
            job_timeout_minutes: 15,
            search_results_per_strategy: 5,
            search_max_candidates: 10,
            transcribe_chunk_seconds: 30,
            transcribe_max_chunks: 10,
            segment_end_padding_seconds: 2.0,
            english_min_function_words: 5,
            english_max_nonascii_ratio: 0.2,
            stream_capacity: 100,
            free_requests_per_window: 3,
            free_window_minutes: 240,
            subscription_cache_minutes: 5,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the settings table.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            max_concurrent_jobs: parse_or(
                get_setting(pool, "max_concurrent_jobs").await?,
                defaults.max_concurrent_jobs,
            ),
            job_poll_interval_ms: parse_or(
                get_setting(pool, "job_poll_interval_ms").await?,
                defaults.job_poll_interval_ms,
            ),
            job_timeout_minutes: parse_or(
                get_setting(pool, "job_timeout_minutes").await?,
                defaults.job_timeout_minutes,
            ),
            search_results_per_strategy: parse_or(
                get_setting(pool, "search_results_per_strategy").await?,
                defaults.search_results_per_strategy,
            ),
            search_max_candidates: parse_or(
                get_setting(pool, "search_max_candidates").await?,
                defaults.search_max_candidates,
            ),
            transcribe_chunk_seconds: parse_or(
                get_setting(pool, "transcribe_chunk_seconds").await?,
                defaults.transcribe_chunk_seconds,
            ),
            transcribe_max_chunks: parse_or(
                get_setting(pool, "transcribe_max_chunks").await?,
                defaults.transcribe_max_chunks,
            ),
            segment_end_padding_seconds: parse_or(
                get_setting(pool, "segment_end_padding_seconds").await?,
                defaults.segment_end_padding_seconds,
            ),
            english_min_function_words: parse_or(
                get_setting(pool, "english_min_function_words").await?,
                defaults.english_min_function_words,
            ),
            english_max_nonascii_ratio: parse_or(
                get_setting(pool, "english_max_nonascii_ratio").await?,
                defaults.english_max_nonascii_ratio,
            ),
            stream_capacity: parse_or(
                get_setting(pool, "stream_capacity").await?,
                defaults.stream_capacity,
            ),
            free_requests_per_window: parse_or(
                get_setting(pool, "free_requests_per_window").await?,
                defaults.free_requests_per_window,
            ),
            free_window_minutes: parse_or(
                get_setting(pool, "free_window_minutes").await?,
                defaults.free_window_minutes,
            ),
            subscription_cache_minutes: parse_or(
                get_setting(pool, "subscription_cache_minutes").await?,
                defaults.subscription_cache_minutes,
            ),
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn test_load_defaults() {
        let pool = init_memory_database().await.unwrap();
        let config = ServiceConfig::load(&pool).await.unwrap();
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.free_requests_per_window, 3);
        assert_eq!(config.free_window_minutes, 240);
        assert!((config.english_max_nonascii_ratio - 0.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_load_overridden_setting() {
        let pool = init_memory_database().await.unwrap();
        sqlx::query("UPDATE settings SET value = '8' WHERE key = 'max_concurrent_jobs'")
            .execute(&pool)
            .await
            .unwrap();

        let config = ServiceConfig::load(&pool).await.unwrap();
        assert_eq!(config.max_concurrent_jobs, 8);
    }

    #[test]
    fn test_cli_arg_wins() {
        let path = resolve_root_folder(Some("/tmp/pf"), "PHRASEFIND_TEST_UNSET").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/pf"));
    }
}
