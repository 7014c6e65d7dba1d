//! Account configuration for EWS services
//!
//! Supports loading account settings and credentials from (in order of
//! priority):
//! 1. JSON file in the shared config directory
//! 2. Runtime environment variables (fallback)

use anyhow::{Context, Result};
use config::ConfigDir;
use serde::{Deserialize, Serialize};

use crate::error::EwsResult;
use crate::ews::AuthProvider;

/// Settings filename in the ewsmail config directory
const SETTINGS_FILE: &str = "ews-account.json";

/// Credentials filename in the ewsmail config directory
const CREDENTIALS_FILE: &str = "ews-credentials.json";

/// Per-account sync settings.
///
/// Settings that change which items a sync covers go through the setters,
/// which bump `sync_tag_stamp`; persisted sync headers carrying an older
/// stamp are then treated as unusable and the affected folders resync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    /// EWS endpoint URL, e.g. `https://mail.example.com/EWS/Exchange.asmx`.
    pub endpoint: String,
    pub email: String,
    /// Show unsubscribed public folders under the public root.
    #[serde(default)]
    pub show_public_folders: bool,
    /// Refresh every folder on a scheduled check instead of just the inbox.
    #[serde(default)]
    pub check_all_folders: bool,
    /// Monotonic settings generation; bumped whenever a setting that
    /// affects sync coverage changes.
    #[serde(default)]
    pub sync_tag_stamp: u32,
}

impl AccountSettings {
    pub fn new(endpoint: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            email: email.into(),
            show_public_folders: false,
            check_all_folders: false,
            sync_tag_stamp: 0,
        }
    }

    /// Load settings from ~/.config/ewsmail/ews-account.json.
    pub fn load() -> Result<Self> {
        ConfigDir::open()?
            .read(SETTINGS_FILE)?
            .context("No account settings file found")
    }

    pub fn save(&self) -> Result<()> {
        ConfigDir::open()?
            .write(SETTINGS_FILE, self)
            .context("Failed to save account settings")
    }

    pub fn set_show_public_folders(&mut self, value: bool) {
        if self.show_public_folders != value {
            self.show_public_folders = value;
            self.sync_tag_stamp += 1;
        }
    }

    pub fn set_check_all_folders(&mut self, value: bool) {
        if self.check_all_folders != value {
            self.check_all_folders = value;
            self.sync_tag_stamp += 1;
        }
    }
}

/// Bearer token credentials for the EWS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EwsCredentials {
    pub access_token: String,
}

impl EwsCredentials {
    /// Load credentials using the following priority:
    /// 1. JSON file (~/.config/ewsmail/ews-credentials.json)
    /// 2. Runtime environment variable `EWS_ACCESS_TOKEN`
    pub fn load() -> Result<Self> {
        if let Some(creds) = ConfigDir::open()?.read(CREDENTIALS_FILE)? {
            return Ok(creds);
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("EWS_ACCESS_TOKEN")
            .context("EWS_ACCESS_TOKEN not set and no credentials file found")?;
        Ok(Self { access_token })
    }
}

impl AuthProvider for EwsCredentials {
    fn authorization_header(&self) -> EwsResult<String> {
        Ok(format!("Bearer {}", self.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_bump_stamp_only_on_change() {
        let mut settings = AccountSettings::new("https://x/EWS/Exchange.asmx", "a@example.com");
        assert_eq!(settings.sync_tag_stamp, 0);

        settings.set_show_public_folders(true);
        assert_eq!(settings.sync_tag_stamp, 1);

        // Same value again is a no-op.
        settings.set_show_public_folders(true);
        assert_eq!(settings.sync_tag_stamp, 1);

        settings.set_check_all_folders(true);
        assert_eq!(settings.sync_tag_stamp, 2);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: AccountSettings = serde_json::from_str(
            r#"{"endpoint": "https://x/EWS/Exchange.asmx", "email": "a@example.com"}"#,
        )
        .unwrap();
        assert!(!settings.show_public_folders);
        assert!(!settings.check_all_folders);
        assert_eq!(settings.sync_tag_stamp, 0);
    }

    #[test]
    fn test_bearer_header() {
        let creds = EwsCredentials {
            access_token: "tok".to_string(),
        };
        assert_eq!(creds.authorization_header().unwrap(), "Bearer tok");
    }
}
