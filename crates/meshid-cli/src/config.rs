use meshid_core::config::{DEFAULT_DETECTOR_CONFIDENCE, DEFAULT_THRESHOLD};
use meshid_core::EngineConfig;
use meshid_store::{SqliteStore, SETTING_DETECTOR_CONFIDENCE, SETTING_THRESHOLD};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the face-mesh ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Mapped similarity a match must exceed, when set in the environment.
    pub threshold: Option<f32>,
    /// Face-presence confidence below which the detector reports no face,
    /// when set in the environment.
    pub detector_confidence: Option<f32>,
}

impl Config {
    /// Load configuration from `MESHID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("meshid");

        let model_dir = std::env::var("MESHID_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("MESHID_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        Self {
            model_dir,
            db_path,
            threshold: env_f32("MESHID_THRESHOLD"),
            detector_confidence: env_f32("MESHID_DETECTOR_CONFIDENCE"),
        }
    }

    /// Path to the 468-point face-mesh model.
    pub fn facemesh_model_path(&self) -> String {
        self.model_dir
            .join("face_mesh.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Engine settings: environment first, then values persisted in the
    /// database, then built-in defaults.
    pub fn engine_config(&self, store: &SqliteStore) -> EngineConfig {
        let threshold = self
            .threshold
            .or_else(|| stored_f32(store, SETTING_THRESHOLD))
            .unwrap_or(DEFAULT_THRESHOLD);
        let detector_confidence = self
            .detector_confidence
            .or_else(|| stored_f32(store, SETTING_DETECTOR_CONFIDENCE))
            .unwrap_or(DEFAULT_DETECTOR_CONFIDENCE);
        EngineConfig::new(threshold, detector_confidence)
    }
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn stored_f32(store: &SqliteStore, key: &str) -> Option<f32> {
    match store.get_setting(key) {
        Ok(Some(value)) => match value.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %value, "ignoring unparsable stored setting");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read stored setting");
            None
        }
    }
}
