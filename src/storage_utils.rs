use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::AppConfig;

// STORAGE MANAGER
// Handed to whoever needs persistence; there is no process-wide instance.

pub struct AsyncStorageManager {
    // Root of the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Roots the manager at `base_dir`, creating it if needed.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// Roots the manager next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", name))
    }

    /// Writes `<name>.json` through a temp file and rename, so readers never
    /// see a half-written document.
    pub async fn save<T: Serialize>(&self, name: &str, data: &T) -> anyhow::Result<PathBuf> {
        let final_path = self.path_for(name);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", name));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;

        debug!(path = %final_path.display(), "saved");
        Ok(final_path)
    }

    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        // serde_json validates UTF-8 itself, so skip read_to_string
        let content = fs::read(self.path_for(name)).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Saves a timestamped record: `<prefix>_<YYYY-mm-dd_HH-MM-SS>.json`.
    pub async fn save_snapshot<T: Serialize>(
        &self,
        prefix: &str,
        taken_at: DateTime<Utc>,
        data: &T,
    ) -> anyhow::Result<PathBuf> {
        let name = format!("{}_{}", prefix, taken_at.format("%Y-%m-%d_%H-%M-%S"));
        self.save(&name, data).await
    }

    /// `config.json` if present and readable, defaults otherwise.
    pub async fn load_config(&self) -> AppConfig {
        match self.load::<AppConfig>("config").await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, dir = %self.base_dir.display(), "no usable config.json, using defaults");
                AppConfig::default()
            }
        }
    }
}
