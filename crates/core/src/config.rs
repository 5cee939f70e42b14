use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub exploration: ExplorationConfig,
    pub fetch: FetchConfig,
    pub renderer: RendererConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FALCON_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FALCON_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            jobs: JobsConfig::from_env_profiled(p),
            exploration: ExplorationConfig::from_env_profiled(p),
            fetch: FetchConfig::from_env_profiled(p),
            renderer: RendererConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  jobs:        deadline={}s, expiry={}s, reaper={}s, export_dir={}",
            self.jobs.deadline_secs,
            self.jobs.expiry_secs,
            self.jobs.reaper_interval_secs,
            self.jobs.export_dir.display()
        );
        tracing::info!(
            "  exploration: scrolls={}, pages={}, time={}s, height={}, items={}",
            self.exploration.max_scroll_attempts,
            self.exploration.max_pagination_pages,
            self.exploration.max_dynamic_time_secs,
            self.exploration.max_page_height,
            self.exploration.max_content_items
        );
        tracing::info!("  renderer:    {}", self.renderer.kind);
        tracing::info!(
            "  llm:         provider={}, configured={}",
            self.llm.provider,
            self.llm.is_configured()
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "BACKEND_HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "BACKEND_PORT", 8010),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "http://localhost:3010"),
        }
    }
}

// ── Jobs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Hard deadline wrapping a whole job execution.
    pub deadline_secs: u64,
    /// Loading-stage duration after which a "slow site" warning is emitted.
    pub slow_site_secs: u64,
    /// Heartbeat age after which outgoing messages are flagged as stuck.
    pub stuck_threshold_secs: u64,
    /// Age after which a job and everything attached to it is reaped.
    pub expiry_secs: u64,
    pub reaper_interval_secs: u64,
    /// Scratch directory for export artifacts.
    pub export_dir: PathBuf,
}

impl JobsConfig {
    fn from_env_profiled(p: &str) -> Self {
        let export_dir = profiled_env_opt(p, "EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        Self {
            deadline_secs: profiled_env_parse(p, "JOB_DEADLINE_SECS", 300),
            slow_site_secs: profiled_env_parse(p, "SLOW_SITE_SECS", 45),
            stuck_threshold_secs: profiled_env_parse(p, "STUCK_THRESHOLD_SECS", 60),
            expiry_secs: profiled_env_parse(p, "JOB_EXPIRY_SECS", 7200),
            reaper_interval_secs: profiled_env_parse(p, "REAPER_INTERVAL_SECS", 600),
            export_dir,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn slow_site_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_site_secs)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

// ── Exploration ───────────────────────────────────────────────

/// Default exploration ceilings; per-domain overrides are applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    pub max_scroll_attempts: u32,
    pub max_pagination_pages: u32,
    pub max_dynamic_time_secs: u64,
    pub max_page_height: u64,
    pub max_content_items: u64,
    /// Optional JSON file mapping domain -> partial budget.
    pub overrides_file: Option<PathBuf>,
}

impl ExplorationConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_scroll_attempts: profiled_env_parse(p, "MAX_SCROLL_ATTEMPTS", 20),
            max_pagination_pages: profiled_env_parse(p, "MAX_PAGINATION_PAGES", 5),
            max_dynamic_time_secs: profiled_env_parse(p, "MAX_DYNAMIC_TIME", 60),
            max_page_height: profiled_env_parse(p, "MAX_PAGE_HEIGHT", 500_000),
            max_content_items: profiled_env_parse(p, "MAX_CONTENT_ITEMS", 50_000),
            overrides_file: profiled_env_opt(p, "EXPLORATION_OVERRIDES_FILE").map(PathBuf::from),
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_scroll_attempts: 20,
            max_pagination_pages: 5,
            max_dynamic_time_secs: 60,
            max_page_height: 500_000,
            max_content_items: 50_000,
            overrides_file: None,
        }
    }
}

// ── Lightweight fetch ─────────────────────────────────────────

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl FetchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            timeout_secs: profiled_env_parse(p, "FETCH_TIMEOUT_SECS", 30),
            user_agent: profiled_env_or(p, "FETCH_USER_AGENT", DEFAULT_USER_AGENT),
        }
    }
}

// ── Renderer ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// "auto", "chromium" or "none".
    pub kind: String,
    pub chrome_executable: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
}

impl RendererConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            kind: profiled_env_or(p, "RENDERER", "auto").to_lowercase(),
            chrome_executable: profiled_env_opt(p, "CHROME_EXECUTABLE").map(PathBuf::from),
            navigation_timeout_secs: profiled_env_parse(p, "RENDER_NAV_TIMEOUT_SECS", 45),
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "gemini").to_lowercase(),
            gemini_api_key: profiled_env_opt(p, "GEMINI_API_KEY"),
            gemini_model: profiled_env_or(p, "GEMINI_MODEL", "gemini-1.5-flash"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: profiled_env_or(p, "OPENAI_BASE_URL", "https://api.openai.com"),
            temperature: profiled_env_parse(p, "LLM_TEMPERATURE", 0.1),
            max_tokens: profiled_env_parse(p, "LLM_MAX_TOKENS", 4096),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "gemini" => self.gemini_api_key.is_some(),
            "openai" => self.openai_api_key.is_some(),
            _ => false,
        }
    }
}
