//! Declarative YAML UI flow scripts

use cmsprobe_common::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A complete UI flow parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this script
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport override; the suite default applies when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,

    /// Whether screenshots are compared against baselines
    #[serde(default)]
    pub visual_regression: bool,

    /// Threshold for visual diff (0.0 - 100.0 percent)
    #[serde(default)]
    pub visual_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1440, height: 900 }
    }
}

/// A single step in a flow
///
/// String fields may carry `${role.field}` placeholders such as
/// `${admin.name}`; they are resolved against the suite configuration
/// right before the step runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a path (relative to the base URL)
    Visit {
        url: String,
    },

    /// Click an element, optionally the first one containing some text
    Click {
        selector: String,
        #[serde(default)]
        contains: Option<String>,
        /// Locator for an iframe holding the element
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },

    /// Type text key by key
    Type {
        selector: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },

    /// Set an input's value directly
    Fill {
        selector: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },

    /// Select a dropdown option by label
    Select {
        selector: String,
        option: String,
    },

    /// Assert on an element's inner text
    AssertText {
        selector: String,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },

    /// Assert on an input's current value
    AssertValue {
        selector: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },

    /// Assert the selected option of a dropdown contains some text
    AssertSelected {
        selector: String,
        contains: String,
    },

    /// Assert the page shows some text anywhere
    AssertPageContains {
        text: String,
    },

    /// Assert the current URL contains some text
    AssertUrl {
        contains: String,
    },

    /// Read a math challenge, solve it and type the answer
    SolveCaptcha {
        #[serde(default = "default_captcha_challenge")]
        challenge: String,
        #[serde(default = "default_captcha_response")]
        response: String,
    },

    /// Replace the contents of a CKEditor instance
    SetEditorData {
        instance: String,
        content: String,
    },

    /// Wait for an element to reach a state
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Take a screenshot
    Screenshot {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        full_page: bool,
    },

    /// Provision an account through drush
    CreateUser {
        username: String,
        password: String,
        #[serde(default)]
        email: Option<String>,
        role: String,
    },

    /// Provision the account described by a persona fixture
    CreateFixtureUser {
        fixture: String,
    },

    /// Cancel an account and delete its content through drush
    DeleteUser {
        username: String,
    },

    /// Log in through the form as a persona fixture
    UserLogin {
        fixture: String,
    },

    /// Log out through the logout link
    UserLogout,

    /// Log in as a configured role, solving the math CAPTCHA
    LoginWithCaptcha {
        role: Role,
    },

    /// Create, grant a role to and cancel an account through the admin UI as a persona
    UiCreateUser {
        role_label: String,
        as_fixture: String,
    },

    /// Run a drush command
    Drush {
        args: Vec<String>,
        #[serde(default)]
        tolerate: bool,
    },

    /// Run a composer command in the project root
    Composer {
        args: Vec<String>,
        #[serde(default)]
        tolerate: bool,
    },

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    10_000
}

fn default_captcha_challenge() -> String {
    ".field-prefix".to_string()
}

fn default_captcha_response() -> String {
    "#edit-captcha-response".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl TestStep {
    /// Short label used in logs and reports
    pub fn name(&self) -> String {
        match self {
            TestStep::Visit { url } => format!("visit:{}", url),
            TestStep::Click { selector, .. } => format!("click:{}", selector),
            TestStep::Type { selector, .. } => format!("type:{}", selector),
            TestStep::Fill { selector, .. } => format!("fill:{}", selector),
            TestStep::Select { selector, .. } => format!("select:{}", selector),
            TestStep::AssertText { selector, .. } => format!("assert_text:{}", selector),
            TestStep::AssertValue { selector, .. } => format!("assert_value:{}", selector),
            TestStep::AssertSelected { selector, .. } => format!("assert_selected:{}", selector),
            TestStep::AssertPageContains { text } => format!("assert_page_contains:{}", truncate(text)),
            TestStep::SolveCaptcha { .. } => "solve_captcha".to_string(),
            TestStep::SetEditorData { instance, .. } => format!("set_editor_data:{}", instance),
            TestStep::Wait { selector, .. } => format!("wait:{}", selector),
            TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            TestStep::CreateUser { username, .. } => format!("create_user:{}", username),
            TestStep::CreateFixtureUser { fixture } => format!("create_fixture_user:{}", fixture),
            TestStep::DeleteUser { username } => format!("delete_user:{}", username),
            TestStep::AssertUrl { contains } => format!("assert_url:{}", truncate(contains)),
            TestStep::UserLogin { fixture } => format!("user_login:{}", fixture),
            TestStep::UserLogout => "user_logout".to_string(),
            TestStep::LoginWithCaptcha { role } => format!("login_with_captcha:{}", role),
            TestStep::UiCreateUser { role_label, .. } => format!("ui_create_user:{}", role_label),
            TestStep::Drush { args, .. } => format!("drush:{}", truncate(&args.join(" "))),
            TestStep::Composer { args, .. } => format!("composer:{}", truncate(&args.join(" "))),
            TestStep::Log { message } => format!("log:{}", truncate(message)),
        }
    }

    /// Copy of this step with every placeholder replaced
    pub fn resolve(&self, vars: &HashMap<String, String>) -> E2eResult<Self> {
        let pattern = Regex::new(r"\$\{([A-Za-z0-9_.]+)\}")?;
        let mut value = serde_json::to_value(self)?;
        resolve_value(&mut value, &pattern, vars)?;
        Ok(serde_json::from_value(value)?)
    }
}

fn resolve_value(value: &mut Value, pattern: &Regex, vars: &HashMap<String, String>) -> E2eResult<()> {
    match value {
        Value::String(s) => {
            if let Some(missing) = pattern
                .captures_iter(s)
                .map(|c| c[1].to_string())
                .find(|key| !vars.contains_key(key))
            {
                return Err(E2eError::UnknownPlaceholder(missing));
            }
            let resolved = pattern.replace_all(s, |caps: &regex::Captures| vars[&caps[1]].clone());
            *s = resolved.into_owned();
        }
        Value::Array(items) => {
            for item in items {
                resolve_value(item, pattern, vars)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                resolve_value(item, pattern, vars)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn truncate(text: &str) -> String {
    text.chars().take(30).collect()
}

impl TestSpec {
    /// Parse a spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all specs from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }
}
