use std::path::Path;
use std::str::FromStr;

use log::Level;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::session::TAB_ID_HEADER;

/// Runtime configuration for the sync engine.
///
/// Values are loaded from (in order): `/etc/ledger/sync.json`, `ledger/sync.json`
/// in the user config folders (all optional), an explicitly passed file, and
/// environment variables prefixed with `LSYNC_` (e.g. `LSYNC_QUIET_WINDOW_MS`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub server_url: Url,
	pub events_path: String,
	pub tab_header: String,
	pub quiet_window_ms: u64,
	// Reconnect backoff: initial and capped delay, jitter as a percentage of
	// the delay, and an attempt budget (0 = unlimited)
	pub reconnect_initial_ms: u64,
	pub reconnect_max_ms: u64,
	pub reconnect_jitter_pct: u8,
	pub reconnect_max_attempts: u32,
	pub refresh_on_reconnect: bool,
	pub connect_timeout_ms: u64,
	// 0 disables the dead-man timeout on the stream
	pub idle_timeout_ms: u64,
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			server_url: Url::parse("http://127.0.0.1:8080/").expect("static URL is valid"),
			events_path: "api/sync/events".to_string(),
			tab_header: TAB_ID_HEADER.to_string(),
			quiet_window_ms: 500,
			reconnect_initial_ms: 1_000,
			reconnect_max_ms: 30_000,
			reconnect_jitter_pct: 25,
			reconnect_max_attempts: 0,
			refresh_on_reconnect: true,
			connect_timeout_ms: 10_000,
			idle_timeout_ms: 0,
			log_level: Level::Info,
		}
	}
}

impl Settings {
	/// Absolute URL of the change stream endpoint. `events_path` resolves
	/// against `server_url`, so a relative path keeps the server's path prefix
	/// (when it ends in `/`) and a path starting with `/` replaces it.
	pub fn events_url(&self) -> Result<Url, url::ParseError> {
		self.server_url.join(&self.events_path)
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load() -> Result<Settings, SettingsError> {
	load_from(None)
}

/// Like [`load`], with `extra` layered on top of the standard files.
pub fn load_from(extra: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/ledger/sync.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("ledger").join("sync.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("ledger").join("sync.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}
	if let Some(path) = extra {
		builder = builder.add_source(config::File::from(path).required(true));
	}

	builder = builder.add_source(config::Environment::with_prefix("LSYNC").separator("__"));

	let cfg = builder.build()?;
	let mut s: Settings = cfg.try_deserialize()?;

	// Direct variables win over whatever the layered sources produced; some
	// harnesses set them in ways the `config` crate does not map.
	override_from_env("LSYNC_SERVER_URL", &mut s.server_url);
	override_from_env("LSYNC_EVENTS_PATH", &mut s.events_path);
	override_from_env("LSYNC_TAB_HEADER", &mut s.tab_header);
	override_from_env("LSYNC_QUIET_WINDOW_MS", &mut s.quiet_window_ms);
	override_from_env("LSYNC_RECONNECT_INITIAL_MS", &mut s.reconnect_initial_ms);
	override_from_env("LSYNC_RECONNECT_MAX_MS", &mut s.reconnect_max_ms);
	override_from_env("LSYNC_RECONNECT_JITTER_PCT", &mut s.reconnect_jitter_pct);
	override_from_env("LSYNC_RECONNECT_MAX_ATTEMPTS", &mut s.reconnect_max_attempts);
	override_from_env("LSYNC_REFRESH_ON_RECONNECT", &mut s.refresh_on_reconnect);
	override_from_env("LSYNC_CONNECT_TIMEOUT_MS", &mut s.connect_timeout_ms);
	override_from_env("LSYNC_IDLE_TIMEOUT_MS", &mut s.idle_timeout_ms);
	override_from_env("LSYNC_LOG_LEVEL", &mut s.log_level);

	Ok(s)
}

/// Replace `target` with the parsed value of `var` when it is set, non-empty
/// and parses.
fn override_from_env<T: FromStr>(var: &str, target: &mut T) {
	if let Ok(raw) = std::env::var(var) {
		if !raw.is_empty() {
			if let Ok(parsed) = raw.parse::<T>() {
				*target = parsed;
			}
		}
	}
}
