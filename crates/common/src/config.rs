//! Site configuration: base URL, role credentials and tool invocation

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// A site role the suite can log in as
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Admin,
    Editor,
}

impl Role {
    /// Every role the suite requires credentials for
    pub const ALL: [Role; 2] = [Role::Admin, Role::Editor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            other => Err(Error::InvalidConfig(format!("unknown role: {}", other))),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Login credentials for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name typed into the login form
    pub name: String,

    /// Account password
    pub pass: String,

    /// Machine name of the Drupal role granted to the account
    pub role: String,
}

impl Credentials {
    pub fn new(name: &str, pass: &str, role: &str) -> Self {
        Self {
            name: name.to_string(),
            pass: pass.to_string(),
            role: role.to_string(),
        }
    }
}

/// Where drush and composer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalEnv {
    /// Inside a Lando container (`lando drush ...`)
    #[default]
    Lando,
    /// Directly on the host (`drush ...`)
    Native,
}

impl LocalEnv {
    /// Default argv prefix for a tool in this environment
    pub fn prefix(&self, tool: &str) -> Vec<String> {
        match self {
            LocalEnv::Lando => vec!["lando".to_string(), tool.to_string()],
            LocalEnv::Native => vec![tool.to_string()],
        }
    }
}

/// drush invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrushConfig {
    /// Explicit argv prefix, overrides `local_env` when set
    pub command: Option<Vec<String>>,

    /// Selects the default prefix when no command is given
    pub local_env: LocalEnv,

    /// Working directory for the subprocess
    pub working_dir: Option<PathBuf>,

    /// Timeout for ordinary invocations
    pub timeout_secs: u64,

    /// Timeout for account cancellation, which deletes content server-side
    pub delete_timeout_secs: u64,
}

impl Default for DrushConfig {
    fn default() -> Self {
        Self {
            command: None,
            local_env: LocalEnv::Lando,
            working_dir: None,
            timeout_secs: 60,
            delete_timeout_secs: 120,
        }
    }
}

impl DrushConfig {
    /// Resolve the argv prefix used for every drush call
    pub fn program(&self) -> Vec<String> {
        match &self.command {
            Some(command) => command.clone(),
            None => self.local_env.prefix("drush"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}

/// composer invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Explicit argv prefix, overrides `local_env` when set
    pub command: Option<Vec<String>>,

    pub local_env: LocalEnv,

    /// Project root holding `composer.json`
    pub working_dir: Option<PathBuf>,

    /// Dependency resolution can be slow
    pub timeout_secs: u64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            command: None,
            local_env: LocalEnv::Lando,
            working_dir: None,
            timeout_secs: 300,
        }
    }
}

impl ComposerConfig {
    pub fn program(&self) -> Vec<String> {
        match &self.command {
            Some(command) => command.clone(),
            None => self.local_env.prefix("composer"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the site under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Base URL of the site
    pub base_url: String,

    /// Accept self-signed certificates (local Lando sites)
    pub accept_invalid_certs: bool,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Credentials keyed by role
    pub roles: BTreeMap<Role, Credentials>,

    /// Directory holding `users/<persona>.json` fixtures
    pub fixtures_dir: PathBuf,

    /// drush settings
    pub drush: DrushConfig,

    /// composer settings
    pub composer: ComposerConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(Role::Admin, Credentials::new("admin", "admin", "administrator"));
        roles.insert(Role::Editor, Credentials::new("editor", "editor", "editor"));

        Self {
            base_url: "https://niid9.lndo.site/".to_string(),
            accept_invalid_certs: true,
            request_timeout_secs: 30,
            roles,
            fixtures_dir: PathBuf::from("fixtures"),
            drush: DrushConfig::default(),
            composer: ComposerConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Check the configuration before any command runs
    pub fn validate(&self) -> Result<()> {
        self.url()?;

        for role in Role::ALL {
            let creds = self
                .roles
                .get(&role)
                .ok_or_else(|| Error::InvalidConfig(format!("missing credentials for role {}", role)))?;
            if creds.name.is_empty() || creds.pass.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "empty name or password for role {}",
                    role
                )));
            }
        }

        if self.drush.program().is_empty() {
            return Err(Error::InvalidConfig("drush command is empty".to_string()));
        }
        if self.composer.program().is_empty() {
            return Err(Error::InvalidConfig("composer command is empty".to_string()));
        }

        Ok(())
    }

    /// Parsed base URL
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|e| Error::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Credentials for a role
    pub fn credentials(&self, role: Role) -> Result<&Credentials> {
        self.roles
            .get(&role)
            .ok_or_else(|| Error::InvalidConfig(format!("missing credentials for role {}", role)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
