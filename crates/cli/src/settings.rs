use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "openbase";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CODER_PREFIX: &str = "/api/coder";
pub const DEFAULT_OPENBASE_PREFIX: &str = "/api/openbase";

/// Where the backend lives and which project to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_coder_prefix")]
    pub coder_prefix: String,
    #[serde(default = "default_openbase_prefix")]
    pub openbase_prefix: String,
    /// Project id for the introspection routes; empty until chosen.
    #[serde(default)]
    pub project: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            coder_prefix: default_coder_prefix(),
            openbase_prefix: default_openbase_prefix(),
            project: String::new(),
        }
    }
}

impl BackendSettings {
    pub fn normalized(mut self) -> Self {
        self.server_url = normalize_url_part(&self.server_url, default_server_url);
        self.coder_prefix = normalize_prefix(&self.coder_prefix, default_coder_prefix);
        self.openbase_prefix = normalize_prefix(&self.openbase_prefix, default_openbase_prefix);
        self.project = self.project.trim().to_string();
        self
    }

    /// Base URL for the chat surface, e.g. `http://host:8000/api/coder`.
    pub fn coder_base_url(&self) -> String {
        format!("{}{}", self.server_url, self.coder_prefix)
    }

    /// Base URL for the introspection surface.
    pub fn openbase_base_url(&self) -> String {
        format!("{}{}", self.server_url, self.openbase_prefix)
    }
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_coder_prefix() -> String {
    DEFAULT_CODER_PREFIX.to_string()
}

fn default_openbase_prefix() -> String {
    DEFAULT_OPENBASE_PREFIX.to_string()
}

fn normalize_url_part(raw: &str, fallback: fn() -> String) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn normalize_prefix(raw: &str, fallback: fn() -> String) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return fallback();
    }

    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file to {path:?}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to move settings file from {from:?} to {to:?}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Settings persistence with lock-free reads.
pub struct SettingsStore {
    settings: Arc<ArcSwap<BackendSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".openbase"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<BackendSettings> {
        self.settings.load_full()
    }

    /// Persists and publishes new settings atomically.
    pub fn update(&self, settings: BackendSettings) -> Result<(), SettingsError> {
        let normalized = settings.normalized();
        self.persist(&normalized)?;
        self.settings.store(Arc::new(normalized));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> BackendSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return BackendSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(BackendSettings::default())).merge(Json::file(path));

        match figment.extract::<BackendSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                BackendSettings::default()
            }
        }
    }

    fn persist(&self, settings: &BackendSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_restores_defaults_and_strips_slashes() {
        let settings = BackendSettings {
            server_url: "http://devbox:9000/".to_string(),
            coder_prefix: "api/coder/".to_string(),
            openbase_prefix: "  ".to_string(),
            project: " demo ".to_string(),
        }
        .normalized();

        assert_eq!(settings.server_url, "http://devbox:9000");
        assert_eq!(settings.coder_prefix, "/api/coder");
        assert_eq!(settings.openbase_prefix, DEFAULT_OPENBASE_PREFIX);
        assert_eq!(settings.project, "demo");
        assert_eq!(settings.coder_base_url(), "http://devbox:9000/api/coder");
    }

    #[test]
    fn partial_settings_file_merges_over_defaults() {
        let directory = std::env::temp_dir().join(format!(
            "openbase-settings-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&directory).unwrap();
        let path = directory.join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"server_url": "http://elsewhere:8000"}"#).unwrap();

        let store = SettingsStore::new(path.clone());
        let settings = store.settings();
        assert_eq!(settings.server_url, "http://elsewhere:8000");
        assert_eq!(settings.coder_prefix, DEFAULT_CODER_PREFIX);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn update_round_trips_through_disk() {
        let directory = std::env::temp_dir().join(format!(
            "openbase-settings-update-{}",
            std::process::id()
        ));
        let path = directory.join(SETTINGS_FILE_NAME);

        let store = SettingsStore::new(path.clone());
        let settings = BackendSettings {
            project: "demo".to_string(),
            ..BackendSettings::default()
        };
        store.update(settings).unwrap();

        let reloaded = SettingsStore::new(path.clone());
        assert_eq!(reloaded.settings().project, "demo");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&directory).ok();
    }
}
