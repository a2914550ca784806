use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use greenhouse_common::{HistoryEntry, RuntimeConfig, Settings};

/// JSON documents under the data directory. A missing file loads as the
/// default; an unreadable one is an error the caller downgrades to a warning.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    settings_path: Arc<PathBuf>,
    history_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("GREENHOUSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.greenhouse"));
        Self::with_dir(&data_dir)
    }

    pub fn with_dir(data_dir: &Path) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            settings_path: Arc::new(data_dir.join("settings.json")),
            history_path: Arc::new(data_dir.join("history.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load<T>(&self, path: &Path) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice::<T>(&raw)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn save<T>(&self, path: &Path, value: &T) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        // Write-then-rename so a power cut never leaves a truncated document.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        self.load(&self.runtime_path).await
    }

    pub async fn load_settings(&self) -> anyhow::Result<Settings> {
        self.load(&self.settings_path).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        self.save(&self.settings_path, settings).await
    }

    pub async fn load_history(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        self.load(&self.history_path).await
    }

    pub async fn save_history(&self, entries: &[HistoryEntry]) -> anyhow::Result<()> {
        self.save(&self.history_path, entries).await
    }
}
