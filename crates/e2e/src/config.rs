//! Suite configuration (`cmsprobe.toml`)

use cmsprobe_common::SiteConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::spec::Viewport;
use crate::visual::VisualConfig;

/// Everything a suite run needs, passed explicitly to each component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Site, credentials and drush settings
    #[serde(flatten)]
    pub site: SiteConfig,

    /// Viewport for scripts that do not set their own
    pub viewport: Viewport,

    /// Scripts run at the same time, each with its own browser
    pub concurrency: usize,

    /// How long to wait for the site before giving up
    pub startup_timeout_secs: u64,

    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,

    pub browser: PlaywrightConfig,
    pub visual: VisualConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            viewport: Viewport::default(),
            concurrency: 1,
            startup_timeout_secs: 60,
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
            browser: PlaywrightConfig::default(),
            visual: VisualConfig::default(),
        }
    }
}

impl SuiteConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        self.site.validate()?;

        if self.concurrency == 0 {
            return Err(E2eError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.visual.threshold) {
            return Err(E2eError::InvalidConfig(format!(
                "visual threshold {} outside 0-100",
                self.visual.threshold
            )));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Values available to `${...}` placeholders in scripts
    pub fn placeholders(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("base_url".to_string(), self.site.base_url.clone());

        for (role, creds) in &self.site.roles {
            vars.insert(format!("{}.name", role), creds.name.clone());
            vars.insert(format!("{}.pass", role), creds.pass.clone());
            vars.insert(format!("{}.role", role), creds.role.clone());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsprobe_common::Role;

    #[test]
    fn test_defaults_match_site_setup() {
        let config = SuiteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.viewport, Viewport { width: 1440, height: 900 });
        assert_eq!(config.visual.timeout_ms, 180_000);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
base_url = "https://example.lndo.site/"
concurrency = 3

[roles.admin]
name = "root"
pass = "pw"
role = "administrator"

[roles.editor]
name = "ed"
pass = "pw"
role = "editor"

[drush]
command = ["ddev", "drush"]

[viewport]
width = 1280
height = 720

[browser]
browser = "firefox"
headless = false

[visual]
enabled = false
batch_id = "nightly"
"#;
        let config: SuiteConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.site.base_url, "https://example.lndo.site/");
        assert_eq!(config.site.credentials(Role::Admin).unwrap().name, "root");
        assert_eq!(config.site.drush.program(), vec!["ddev", "drush"]);
        assert_eq!(config.browser.browser, crate::playwright::Browser::Firefox);
        assert!(!config.visual.enabled);
        assert_eq!(config.visual.batch_actual_dir(), PathBuf::from("test-results/screenshots/nightly"));
    }

    #[test]
    fn test_placeholders_cover_roles() {
        let vars = SuiteConfig::default().placeholders();
        assert_eq!(vars["admin.name"], "admin");
        assert_eq!(vars["editor.pass"], "editor");
        assert_eq!(vars["admin.role"], "administrator");
        assert_eq!(vars["base_url"], "https://niid9.lndo.site/");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = SuiteConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
