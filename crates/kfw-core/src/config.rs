use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_SEARCH_URL: &str =
    "https://api.kufar.by/search-api/v2/search/rendered-paginated";
pub const DEFAULT_PHONE_URL: &str = "https://api.kufar.by/search-api/v2/item/{ad_id}/phone";

/// Typed configuration for the watcher, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,

    // Storage
    pub queries_file: PathBuf,
    pub seen_file: PathBuf,

    // Pacing
    pub delay_between_queries: Duration,
    pub delay_main_loop: Duration,
    pub notify_pause: Duration,

    // Kufar
    pub kufar_search_url: String,
    pub kufar_phone_url: String,
    pub kufar_token: Option<String>,
    pub kufar_lang: String,
    pub search_default_limit: u32,
    pub http_timeout: Duration,
    pub enrich_details: bool,

    // Rendering
    pub caption_limit: usize,
    pub display_utc_offset_hours: i64,

    // Diagnostics
    pub latency_warn_threshold: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));
        fs::create_dir_all(&data_dir)?;
        let queries_file = env_path("QUERIES_FILE").unwrap_or_else(|| data_dir.join("queries.json"));
        let seen_file = env_path("SEEN_FILE").unwrap_or_else(|| data_dir.join("cached_ads.json"));

        let delay_between_queries =
            Duration::from_secs(env_u64("DELAY_BETWEEN_QUERIES").unwrap_or(5));
        let delay_main_loop = Duration::from_secs(env_u64("DELAY_MAIN_LOOP").unwrap_or(60));
        let notify_pause = Duration::from_millis(env_u64("NOTIFY_PAUSE_MS").unwrap_or(1000));

        let kufar_search_url = env_str("KUFAR_SEARCH_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
        let kufar_phone_url = env_str("KUFAR_PHONE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_PHONE_URL.to_string());
        let kufar_token = env_str("KUFAR_TOKEN").and_then(non_empty);
        let kufar_lang = env_str("KUFAR_LANG")
            .and_then(non_empty)
            .unwrap_or_else(|| "ru".to_string());
        let search_default_limit = env_u32("SEARCH_DEFAULT_LIMIT")
            .filter(|v| *v > 0)
            .unwrap_or(10);
        let http_timeout = Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS").unwrap_or(20));
        let enrich_details = env_bool("ENRICH_DETAILS").unwrap_or(true);

        let caption_limit = env_usize("CAPTION_LIMIT").unwrap_or(1024);
        let display_utc_offset_hours = env_i64("DISPLAY_UTC_OFFSET_HOURS").unwrap_or(3);

        let latency_warn_threshold = env_u64("LATENCY_WARN_SECS").map(Duration::from_secs);

        Ok(Self {
            telegram_bot_token,
            admin_ids,
            queries_file,
            seen_file,
            delay_between_queries,
            delay_main_loop,
            notify_pause,
            kufar_search_url,
            kufar_phone_url,
            kufar_token,
            kufar_lang,
            search_default_limit,
            http_timeout,
            enrich_details,
            caption_limit,
            display_utc_offset_hours,
            latency_warn_threshold,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
