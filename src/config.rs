use crate::error::PayResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Wallet
    pub backend: String,
    pub api_base_url: String,
    pub push_url: String,
    pub reconnect_delay_ms: u64,
    pub local_db_path: String,
    pub default_user: String,
    pub page_size: usize,

    // Recognition
    pub recognition: String,
    pub asr_engine: String,
    pub vosk_model_path: String,
    pub wyoming_host: String,
    pub wyoming_port: u16,
    pub language: String,
    pub allow_simulation: bool,
    pub heuristic_picker: String,
    pub heuristic_phrases: Vec<String>,
    pub min_confidence: f32,
    pub voice_corrections: HashMap<String, String>,

    // Authentication
    pub passphrase_policy: String,
    pub passphrase_variants: HashMap<String, Vec<String>>,
    pub passphrase_similarity: f64,

    // Payments
    pub payment_scheme: String,
    pub audit_log: bool,

    // Meta
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "remote".to_string(),
            api_base_url: "http://localhost:3001/api".to_string(),
            push_url: "ws://localhost:3001".to_string(),
            reconnect_delay_ms: 3000,
            local_db_path: dirs::data_dir()
                .unwrap_or_default()
                .join("voicepay/wallet.db")
                .to_string_lossy()
                .to_string(),
            default_user: "Harsh".to_string(),
            page_size: 50,

            recognition: "auto".to_string(),
            asr_engine: "vosk".to_string(),
            vosk_model_path: dirs::data_dir()
                .unwrap_or_default()
                .join("voicepay/models/vosk-model-small-en-in")
                .to_string_lossy()
                .to_string(),
            wyoming_host: "localhost".to_string(),
            wyoming_port: 10300,
            language: "en-IN".to_string(),
            allow_simulation: true,
            heuristic_picker: "random".to_string(),
            heuristic_phrases: vec![
                "UPI ACTIVATE".to_string(),
                "scan QR".to_string(),
                "two hundred rupees".to_string(),
                "yes".to_string(),
                "no".to_string(),
                "harsh".to_string(),
                "cancel".to_string(),
            ],
            min_confidence: 0.0,
            voice_corrections: HashMap::from([
                ("you pee eye".to_string(), "upi".to_string()),
                ("u p i".to_string(), "upi".to_string()),
                ("q r".to_string(), "qr".to_string()),
            ]),

            passphrase_policy: "fuzzy".to_string(),
            passphrase_variants: HashMap::from([(
                "harsh".to_string(),
                vec!["hash".to_string(), "harsh".to_string()],
            )]),
            passphrase_similarity: 0.8,

            payment_scheme: "upi".to_string(),
            audit_log: true,

            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> PayResult<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from a specific file, falling back to defaults when missing or corrupt
    pub fn load_from(path: &Path) -> PayResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> PayResult<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> PayResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether the wallet lives in the local SQLite file instead of the HTTP backend
    pub fn uses_local_backend(&self) -> bool {
        self.backend.eq_ignore_ascii_case("local")
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voicepay")
        .join("config.json")
}
