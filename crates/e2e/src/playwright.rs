//! Playwright browser automation
//!
//! A small Node bridge (`driver.js`) owns a single page and executes one
//! JSON command per line. The Rust side sends a command, waits for its
//! reply, then sends the next, so every script drives its page strictly in
//! order and page state (cookies, current URL) carries from step to step.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::{Viewport, WaitState};

const DRIVER_SOURCE: &str = include_str!("driver.js");

/// Extra time allowed on top of the in-browser timeout before the bridge
/// is considered hung
const REPLY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// A command understood by the bridge
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriverCommand {
    Goto {
        url: String,
    },
    Click {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        has_text: Option<String>,
        force: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    Type {
        selector: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    Fill {
        selector: String,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    Select {
        selector: String,
        label: String,
    },
    InnerText {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    InputValue {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
    },
    SelectedText {
        selector: String,
    },
    BodyText,
    WaitFor {
        selector: String,
        state: WaitState,
        timeout_ms: u64,
    },
    SetEditorData {
        instance: String,
        data: String,
    },
    Screenshot {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        full_page: bool,
    },
    Url,
}

impl DriverCommand {
    pub fn op(&self) -> &'static str {
        match self {
            DriverCommand::Goto { .. } => "goto",
            DriverCommand::Click { .. } => "click",
            DriverCommand::Type { .. } => "type",
            DriverCommand::Fill { .. } => "fill",
            DriverCommand::Select { .. } => "select",
            DriverCommand::InnerText { .. } => "inner_text",
            DriverCommand::InputValue { .. } => "input_value",
            DriverCommand::SelectedText { .. } => "selected_text",
            DriverCommand::BodyText => "body_text",
            DriverCommand::WaitFor { .. } => "wait_for",
            DriverCommand::SetEditorData { .. } => "set_editor_data",
            DriverCommand::Screenshot { .. } => "screenshot",
            DriverCommand::Url => "url",
        }
    }

    fn timeout_ms(&self) -> Option<u64> {
        match self {
            DriverCommand::WaitFor { timeout_ms, .. } => Some(*timeout_ms),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Options handed to the bridge on launch
#[derive(Debug, Serialize)]
struct LaunchOptions<'a> {
    browser: &'a str,
    headless: bool,
    base_url: &'a str,
    width: u32,
    height: u32,
    ignore_https_errors: bool,
    timeout_ms: u64,
}

/// A live browser page behind the bridge
pub struct BrowserSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    command_timeout: Duration,
    screenshot_dir: PathBuf,
    _driver_dir: TempDir,
}

impl BrowserSession {
    /// Start a browser and open one page on the site
    pub async fn launch(
        config: &PlaywrightConfig,
        base_url: &str,
        ignore_https_errors: bool,
        viewport: &Viewport,
    ) -> E2eResult<Self> {
        check_playwright_installed(config).await?;
        std::fs::create_dir_all(&config.screenshot_dir)?;

        let driver_dir = tempfile::tempdir()?;
        let driver_path = driver_dir.path().join("driver.js");
        std::fs::write(&driver_path, DRIVER_SOURCE)?;

        let options = serde_json::to_string(&LaunchOptions {
            browser: config.browser.as_str(),
            headless: config.headless,
            base_url,
            width: viewport.width,
            height: viewport.height,
            ignore_https_errors,
            timeout_ms: config.command_timeout_ms,
        })?;

        let node_path = std::fs::canonicalize(&config.node_modules_dir)
            .unwrap_or_else(|_| config.node_modules_dir.clone());

        debug!("Launching Playwright bridge: {}", driver_path.display());
        let mut child = Command::new(&config.node_binary)
            .arg(&driver_path)
            .arg(options)
            .env("NODE_PATH", node_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("failed to spawn {}: {}", config.node_binary.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".to_string()))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            screenshot_dir: config.screenshot_dir.clone(),
            _driver_dir: driver_dir,
        };

        // The bridge announces itself once the browser is up
        session.read_reply(0, "launch", config.launch_timeout()).await?;
        info!("{} ready ({}x{})", config.browser.as_str(), viewport.width, viewport.height);
        Ok(session)
    }

    /// Send one command and wait for its reply
    pub async fn call(&mut self, command: DriverCommand) -> E2eResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut message = serde_json::to_value(&command)?;
        message["id"] = json!(id);
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        debug!("bridge <- {}", line.trim_end());
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let wait = command
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.command_timeout)
            + REPLY_GRACE;
        self.read_reply(id, command.op(), wait).await
    }

    async fn read_reply(&mut self, id: u64, op: &str, wait: Duration) -> E2eResult<Value> {
        loop {
            let line = match tokio::time::timeout(wait, self.stdout.next_line()).await {
                Err(_) => return Err(E2eError::Timeout(format!("browser command `{}`", op))),
                Ok(line) => line?,
            };

            let Some(line) = line else {
                let stderr = self.drain_stderr().await;
                return Err(E2eError::Playwright(format!("bridge exited during `{}`: {}", op, stderr)));
            };

            let reply: Reply = match serde_json::from_str(&line) {
                Ok(reply) => reply,
                Err(_) => {
                    debug!("bridge output: {}", line);
                    continue;
                }
            };

            if reply.id != id {
                warn!("Discarding reply {} while waiting for {}", reply.id, id);
                continue;
            }

            return if reply.ok {
                Ok(reply.value)
            } else {
                Err(E2eError::Browser {
                    op: op.to_string(),
                    reason: reply.error.unwrap_or_else(|| "unknown error".to_string()),
                })
            };
        }
    }

    async fn drain_stderr(&mut self) -> String {
        let mut buf = String::new();
        if let Some(mut stderr) = self.child.stderr.take() {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf.trim().to_string()
    }

    /// Navigate to a path relative to the site base URL
    pub async fn goto(&mut self, url: &str) -> E2eResult<Option<u16>> {
        let status = self.call(DriverCommand::Goto { url: url.to_string() }).await?;
        Ok(status.as_u64().map(|s| s as u16))
    }

    pub async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.click_in(None, selector, None).await
    }

    /// Click the first match of `selector` that contains `text`
    pub async fn click_with_text(&mut self, selector: &str, text: &str) -> E2eResult<()> {
        self.click_in(None, selector, Some(text)).await
    }

    /// Click inside `frame` when given, otherwise on the page itself
    pub async fn click_in(&mut self, frame: Option<&str>, selector: &str, text: Option<&str>) -> E2eResult<()> {
        self.call(DriverCommand::Click {
            selector: selector.to_string(),
            has_text: text.map(String::from),
            force: true,
            frame: frame.map(String::from),
        })
        .await?;
        Ok(())
    }

    /// Type text key by key into an element
    pub async fn type_text(&mut self, selector: &str, text: &str) -> E2eResult<()> {
        self.type_text_in(None, selector, text).await
    }

    pub async fn type_text_in(&mut self, frame: Option<&str>, selector: &str, text: &str) -> E2eResult<()> {
        self.call(DriverCommand::Type {
            selector: selector.to_string(),
            text: text.to_string(),
            frame: frame.map(String::from),
        })
        .await?;
        Ok(())
    }

    /// Set an input's value outright and fire `change`
    pub async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.fill_in(None, selector, value).await
    }

    pub async fn fill_in(&mut self, frame: Option<&str>, selector: &str, value: &str) -> E2eResult<()> {
        self.call(DriverCommand::Fill {
            selector: selector.to_string(),
            value: value.to_string(),
            frame: frame.map(String::from),
        })
        .await?;
        Ok(())
    }

    /// Pick a dropdown option by its visible label
    pub async fn select(&mut self, selector: &str, label: &str) -> E2eResult<()> {
        self.call(DriverCommand::Select {
            selector: selector.to_string(),
            label: label.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn inner_text(&mut self, selector: &str) -> E2eResult<String> {
        self.inner_text_in(None, selector).await
    }

    pub async fn inner_text_in(&mut self, frame: Option<&str>, selector: &str) -> E2eResult<String> {
        let value = self
            .call(DriverCommand::InnerText {
                selector: selector.to_string(),
                frame: frame.map(String::from),
            })
            .await?;
        Ok(value_as_string(value))
    }

    pub async fn input_value(&mut self, selector: &str) -> E2eResult<String> {
        self.input_value_in(None, selector).await
    }

    pub async fn input_value_in(&mut self, frame: Option<&str>, selector: &str) -> E2eResult<String> {
        let value = self
            .call(DriverCommand::InputValue {
                selector: selector.to_string(),
                frame: frame.map(String::from),
            })
            .await?;
        Ok(value_as_string(value))
    }

    /// Text of the selected option of a `<select>`
    pub async fn selected_text(&mut self, selector: &str) -> E2eResult<String> {
        let value = self.call(DriverCommand::SelectedText { selector: selector.to_string() }).await?;
        Ok(value_as_string(value))
    }

    pub async fn body_text(&mut self) -> E2eResult<String> {
        let value = self.call(DriverCommand::BodyText).await?;
        Ok(value_as_string(value))
    }

    pub async fn wait_for(&mut self, selector: &str, state: WaitState, timeout_ms: u64) -> E2eResult<()> {
        self.call(DriverCommand::WaitFor {
            selector: selector.to_string(),
            state,
            timeout_ms,
        })
        .await?;
        Ok(())
    }

    /// Replace the contents of a CKEditor instance
    pub async fn set_editor_data(&mut self, instance: &str, data: &str) -> E2eResult<()> {
        self.call(DriverCommand::SetEditorData {
            instance: instance.to_string(),
            data: data.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Capture `<screenshot_dir>/<name>.png`
    pub async fn screenshot(&mut self, name: &str, selector: Option<&str>, full_page: bool) -> E2eResult<PathBuf> {
        let path = self.screenshot_dir.join(format!("{}.png", name));
        self.call(DriverCommand::Screenshot {
            path: path.to_string_lossy().to_string(),
            selector: selector.map(String::from),
            full_page,
        })
        .await?;
        Ok(path)
    }

    /// URL of the page after any redirects
    pub async fn current_url(&mut self) -> E2eResult<String> {
        let value = self.call(DriverCommand::Url).await?;
        Ok(value_as_string(value))
    }

    /// Close stdin so the bridge shuts the browser down, then reap it
    pub async fn close(mut self) -> E2eResult<()> {
        self.stdin.shutdown().await?;
        match tokio::time::timeout(Duration::from_secs(10), self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("bridge exited with {}", status);
            }
            Err(_) => {
                warn!("bridge did not exit, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

fn value_as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Check if Playwright is installed
async fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
    let status = Command::new(&config.node_binary)
        .args(["-e", "require.resolve('playwright')"])
        .env("NODE_PATH", &config.node_modules_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(E2eError::PlaywrightNotFound),
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    /// Node.js executable
    pub node_binary: PathBuf,
    /// `node_modules` directory holding the `playwright` package
    pub node_modules_dir: PathBuf,
    /// Default in-browser timeout for a single command
    pub command_timeout_ms: u64,
    /// Time allowed for the browser to start
    pub launch_timeout_ms: u64,
    pub screenshot_dir: PathBuf,
}

impl PlaywrightConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            node_modules_dir: PathBuf::from("node_modules"),
            command_timeout_ms: 10_000,
            launch_timeout_ms: 60_000,
            screenshot_dir: PathBuf::from("test-results/screenshots"),
        }
    }
}
