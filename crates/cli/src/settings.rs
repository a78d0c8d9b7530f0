use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tutor_api::{DEFAULT_BASE_URL, HttpApiConfig};
use tutor_chat::DEFAULT_GREETING;

pub const SETTINGS_DIRECTORY_NAME: &str = "tutor";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "TUTOR_";
pub const DEFAULT_LOG_FILTER: &str = "warn";

const ENV_KEYS: [&str; 4] = ["base_url", "request_timeout_secs", "greeting", "log_filter"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: None,
            greeting: default_greeting(),
            log_filter: default_log_filter(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.base_url = non_blank_or(self.base_url, default_base_url);
        self.greeting = non_blank_or(self.greeting, default_greeting);
        self.log_filter = non_blank_or(self.log_filter, default_log_filter);
        // Zero means "no deadline", same as leaving it out.
        self.request_timeout_secs = self.request_timeout_secs.filter(|secs| *secs > 0);
        self
    }

    pub fn http_config(&self) -> HttpApiConfig {
        let config = HttpApiConfig::new(&self.base_url);
        match self.request_timeout_secs {
            Some(secs) => config.with_request_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

/// Effective settings (defaults, then the settings file, then `TUTOR_*` variables).
pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".tutor"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_effective(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Settings as stored on disk, without environment overrides. Edits start
    /// from here so that a one-off variable is never written back.
    pub fn stored_settings(&self) -> ClientSettings {
        Self::extract(Self::base_figment(&self.config_path))
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings
            .store(Arc::new(Self::load_effective(&self.config_path)));
        Ok(())
    }

    fn load_effective(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::debug!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Self::base_figment(path)
            .merge(Env::prefixed(ENV_PREFIX).only(&ENV_KEYS));
        Self::extract(figment)
    }

    fn base_figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment.merge(Json::file(path))
        } else {
            figment
        }
    }

    fn extract(figment: Figment) -> ClientSettings {
        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!("failed to parse settings: {}. using defaults", error);
                ClientSettings::default()
            }
        }
    }

    // Written next to the target first so a crash never leaves a truncated file.
    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        let directory = self.config_path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory).context(PrepareDirectorySnafu {
            stage: "settings-prepare-directory",
            path: directory.to_path_buf(),
        })?;

        let mut encoded = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
            stage: "settings-encode",
        })?;
        encoded.push(b'\n');

        let staged_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&staged_path, encoded).context(StageSnafu {
            stage: "settings-stage",
            path: staged_path.clone(),
        })?;
        std::fs::rename(&staged_path, &self.config_path).context(CommitSnafu {
            stage: "settings-commit",
            path: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "client settings saved");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {} on `{stage}`: {source}", path.display()))]
    PrepareDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode client settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write staged settings {} on `{stage}`: {source}", path.display()))]
    Stage {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move staged settings into {} on `{stage}`: {source}", path.display()))]
    Commit {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tutor-settings-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join(SETTINGS_FILE_NAME)
    }

    #[test]
    fn normalization_restores_blank_fields() {
        let settings = ClientSettings {
            base_url: "  ".to_string(),
            request_timeout_secs: Some(0),
            greeting: String::new(),
            log_filter: " debug ".to_string(),
        }
        .normalized();

        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.request_timeout_secs, None);
        assert_eq!(settings.greeting, DEFAULT_GREETING);
        assert_eq!(settings.log_filter, "debug");
    }

    #[test]
    fn http_config_carries_timeout() {
        let settings = ClientSettings {
            request_timeout_secs: Some(15),
            ..ClientSettings::default()
        };

        assert_eq!(
            settings.http_config().request_timeout,
            Some(Duration::from_secs(15))
        );
    }

    #[test]
    fn update_persists_and_reloads() {
        let path = scratch_path("update");
        let store = SettingsStore::new(path.clone());

        store
            .update(ClientSettings {
                greeting: "Welcome back!".to_string(),
                request_timeout_secs: Some(20),
                ..ClientSettings::default()
            })
            .unwrap();

        let reopened = SettingsStore::new(path.clone());
        assert_eq!(reopened.stored_settings().greeting, "Welcome back!");
        assert_eq!(reopened.stored_settings().request_timeout_secs, Some(20));
        assert!(!path.with_extension("json.tmp").exists());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn blocked_directory_keeps_current_settings() {
        let blocker = scratch_path("blocked");
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, "{}").unwrap();
        let store = SettingsStore::new(blocker.join(SETTINGS_FILE_NAME));

        let error = store
            .update(ClientSettings {
                greeting: "Never saved".to_string(),
                ..ClientSettings::default()
            })
            .unwrap_err();

        assert!(matches!(
            error,
            SettingsError::PrepareDirectory {
                stage: "settings-prepare-directory",
                ..
            }
        ));
        assert_eq!(store.settings().greeting, DEFAULT_GREETING);
        let _ = std::fs::remove_dir_all(blocker.parent().unwrap());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = scratch_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path.clone());

        assert_eq!(store.stored_settings(), ClientSettings::default());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
