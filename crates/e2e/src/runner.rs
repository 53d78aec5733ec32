//! Runs UI flow scripts: browser steps, drush and composer setup/teardown and visual checks

use chrono::{DateTime, Utc};
use cmsprobe_common::users::default_email;
use cmsprobe_common::{captcha, Composer, Drush, ExecPolicy, FixtureStore, UserClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::flows;
use crate::playwright::{BrowserSession, PlaywrightConfig};
use crate::site::wait_for_site;
use crate::spec::{TestSpec, TestStep, Viewport};
use crate::visual::{VisualDiff, VisualTester};

/// Result of executing one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub visual_diffs: Vec<VisualDiff>,
    pub error: Option<String>,
}

impl TestResult {
    fn aborted(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            started_at: Utc::now(),
            duration_ms: 0,
            steps: vec![],
            visual_diffs: vec![],
            error: Some(error),
        }
    }
}

/// Result of running all scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    fn from_results(results: Vec<TestResult>, skipped: usize, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            skipped,
            started_at,
            duration_ms,
            results,
        }
    }
}

/// Shared, read-only state for every script of a run
struct SuiteContext {
    config: SuiteConfig,
    drush: Drush,
    composer: Composer,
    fixtures: FixtureStore,
    users: UserClient,
    vars: HashMap<String, String>,
}

/// Main E2E test runner
pub struct TestRunner {
    ctx: Arc<SuiteContext>,
}

impl TestRunner {
    /// Validate the configuration and build the runner
    pub fn new(config: SuiteConfig) -> E2eResult<Self> {
        config.validate()?;

        let drush = Drush::new(&config.site.drush);
        let composer = Composer::new(&config.site.composer);
        let fixtures = FixtureStore::new(&config.site.fixtures_dir);
        let users = UserClient::new(drush.clone(), fixtures.clone());
        let vars = config.placeholders();

        Ok(Self {
            ctx: Arc::new(SuiteContext {
                config,
                drush,
                composer,
                fixtures,
                users,
                vars,
            }),
        })
    }

    /// Block until the site answers
    pub async fn wait_for_site(&self) -> E2eResult<()> {
        let site = &self.ctx.config.site;
        wait_for_site(&site.base_url, site.accept_invalid_certs, self.ctx.config.startup_timeout()).await
    }

    /// Run all scripts in the specs directory
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.ctx.config.specs_dir)?;
        Ok(self.run_specs(specs, 0).await)
    }

    /// Run scripts carrying a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.ctx.config.specs_dir)?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag).into_iter().cloned().collect();
        let skipped = specs.len() - filtered.len();
        Ok(self.run_specs(filtered, skipped).await)
    }

    /// Run one script by name
    pub async fn run_test(&self, name: &str) -> E2eResult<TestSuiteResult> {
        let specs = TestSpec::load_all(&self.ctx.config.specs_dir)?;
        let skipped = specs.len().saturating_sub(1);
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;
        Ok(self.run_specs(vec![spec], skipped).await)
    }

    /// Run scripts, up to `concurrency` at a time
    ///
    /// Each script keeps its own browser and runs its steps in order;
    /// results come back in the order the scripts were given. `skipped`
    /// counts scripts that were loaded but filtered out.
    pub async fn run_specs(&self, specs: Vec<TestSpec>, skipped: usize) -> TestSuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();

        info!(
            "Running {} script(s), {} at a time...",
            specs.len(),
            self.ctx.config.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.ctx.config.concurrency));
        let mut set = JoinSet::new();
        for (index, spec) in specs.into_iter().enumerate() {
            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, run_spec(&ctx, &spec).await)
            });
        }

        let mut slots: Vec<Option<TestResult>> = vec![None; names.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Script task failed: {}", e),
            }
        }

        let results: Vec<TestResult> = slots
            .into_iter()
            .zip(&names)
            .map(|(slot, name)| slot.unwrap_or_else(|| TestResult::aborted(name, "script task aborted".to_string())))
            .collect();

        for result in &results {
            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
            }
        }

        let suite = TestSuiteResult::from_results(results, skipped, started_at, start.elapsed().as_millis() as u64);
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        suite
    }

    /// Run a single script
    pub async fn run_spec(&self, spec: &TestSpec) -> TestResult {
        run_spec(&self.ctx, spec).await
    }

    /// Copy this batch's screenshots over the baselines
    pub fn update_baselines(&self) -> E2eResult<usize> {
        VisualTester::new(&self.ctx.config.visual)?.update_all()
    }

    /// Write results to `<output_dir>/test-results.json`
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        let output_dir = &self.ctx.config.output_dir;
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

async fn run_spec(ctx: &SuiteContext, spec: &TestSpec) -> TestResult {
    let started_at = Utc::now();
    let start = Instant::now();
    debug!("Running script: {}", spec.name);

    let mut run = ScriptRun {
        ctx,
        viewport: spec.viewport.unwrap_or(ctx.config.viewport),
        browser: None,
        screenshots: Vec::new(),
    };

    let mut steps = Vec::new();
    let mut test_error: Option<String> = None;

    for step in &spec.steps {
        let step_start = Instant::now();
        let outcome = run.execute(step).await;
        let failed = outcome.as_ref().err().map(|e| e.to_string());

        steps.push(StepResult {
            success: failed.is_none(),
            step_name: step.name(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            error: failed.clone(),
        });

        if let Some(e) = failed {
            test_error = Some(format!("{}: {}", step.name(), e));
            break;
        }
    }

    if let Some(browser) = run.browser.take() {
        if let Err(e) = browser.close().await {
            warn!("Closing browser for {}: {}", spec.name, e);
        }
    }

    let mut visual_diffs = Vec::new();
    if ctx.config.visual.enabled && spec.visual_regression && test_error.is_none() {
        match compare_screenshots(ctx, spec, &run.screenshots) {
            Ok((diffs, failure)) => {
                visual_diffs = diffs;
                test_error = failure;
            }
            Err(e) => test_error = Some(format!("Visual comparison error: {}", e)),
        }
    }

    TestResult {
        name: spec.name.clone(),
        success: test_error.is_none(),
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        steps,
        visual_diffs,
        error: test_error,
    }
}

fn compare_screenshots(
    ctx: &SuiteContext,
    spec: &TestSpec,
    screenshots: &[String],
) -> E2eResult<(Vec<VisualDiff>, Option<String>)> {
    let tester = VisualTester::new(&ctx.config.visual)?;
    let mut diffs = Vec::new();
    let mut failure = None;

    for name in screenshots {
        match tester.compare(name, spec.visual_threshold) {
            Ok(diff) => {
                if !diff.matches && ctx.config.visual.fail_on_diff && failure.is_none() {
                    failure = Some(format!(
                        "Visual regression in '{}': {:.2}% pixels differ",
                        name, diff.diff_percent
                    ));
                }
                diffs.push(diff);
            }
            Err(E2eError::BaselineNotFound(_)) => {
                info!("No baseline for '{}' - run with --update-baselines to record it", name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok((diffs, failure))
}

/// State of one script while its steps execute
struct ScriptRun<'a> {
    ctx: &'a SuiteContext,
    viewport: Viewport,
    browser: Option<BrowserSession>,
    screenshots: Vec<String>,
}

impl ScriptRun<'_> {
    /// The script's browser, started on first use
    async fn browser(&mut self) -> E2eResult<&mut BrowserSession> {
        if self.browser.is_none() {
            let config = PlaywrightConfig {
                screenshot_dir: self.ctx.config.visual.batch_actual_dir(),
                ..self.ctx.config.browser.clone()
            };
            let site = &self.ctx.config.site;
            let session =
                BrowserSession::launch(&config, &site.base_url, site.accept_invalid_certs, &self.viewport).await?;
            self.browser = Some(session);
        }
        self.browser
            .as_mut()
            .ok_or_else(|| E2eError::Playwright("browser not started".to_string()))
    }

    async fn execute(&mut self, step: &TestStep) -> E2eResult<()> {
        let step = step.resolve(&self.ctx.vars)?;
        debug!("Executing step: {}", step.name());

        match step {
            TestStep::Visit { url } => {
                self.browser().await?.goto(&url).await?;
            }
            TestStep::Click { selector, contains, frame } => {
                self.browser()
                    .await?
                    .click_in(frame.as_deref(), &selector, contains.as_deref())
                    .await?;
            }
            TestStep::Type { selector, text, frame } => {
                self.browser().await?.type_text_in(frame.as_deref(), &selector, &text).await?;
            }
            TestStep::Fill { selector, value, frame } => {
                self.browser().await?.fill_in(frame.as_deref(), &selector, &value).await?;
            }
            TestStep::Select { selector, option } => {
                self.browser().await?.select(&selector, &option).await?;
            }
            TestStep::AssertText { selector, equals, contains, frame } => {
                let text = self.browser().await?.inner_text_in(frame.as_deref(), &selector).await?;
                assert_text(&selector, text.trim(), equals.as_deref(), contains.as_deref())?;
            }
            TestStep::AssertValue { selector, value, frame } => {
                let actual = self.browser().await?.input_value_in(frame.as_deref(), &selector).await?;
                assert_text(&selector, &actual, Some(&value), None)?;
            }
            TestStep::AssertSelected { selector, contains } => {
                let selected = self.browser().await?.selected_text(&selector).await?;
                assert_text(&selector, selected.trim(), None, Some(&contains))?;
            }
            TestStep::AssertPageContains { text } => {
                let body = self.browser().await?.body_text().await?;
                if !body.contains(&text) {
                    return Err(E2eError::AssertionFailed(format!("page does not contain {:?}", text)));
                }
            }
            TestStep::AssertUrl { contains } => {
                let url = self.browser().await?.current_url().await?;
                assert_text("url", &url, None, Some(&contains))?;
            }
            TestStep::SolveCaptcha { challenge, response } => {
                let browser = self.browser().await?;
                let question = browser.inner_text(&challenge).await?;
                let answer = captcha::solve(&question)?;
                debug!("Captcha {:?} = {}", question.trim(), answer);
                browser.type_text(&response, &answer.to_string()).await?;
            }
            TestStep::SetEditorData { instance, content } => {
                self.browser().await?.set_editor_data(&instance, &content).await?;
            }
            TestStep::Wait { selector, timeout_ms, state } => {
                self.browser().await?.wait_for(&selector, state, timeout_ms).await?;
            }
            TestStep::Screenshot { name, selector, full_page } => {
                let timeout = self.ctx.config.visual.timeout();
                let browser = self.browser().await?;
                tokio::time::timeout(timeout, browser.screenshot(&name, selector.as_deref(), full_page))
                    .await
                    .map_err(|_| E2eError::Timeout(format!("screenshot {}", name)))??;
                self.screenshots.push(name);
            }
            TestStep::CreateUser { username, password, email, role } => {
                let email = email.unwrap_or_else(|| default_email(&username));
                self.ctx.users.create_user(&username, &password, &email, &role).await?;
            }
            TestStep::CreateFixtureUser { fixture } => {
                self.ctx.users.create_fixture_user(&fixture).await?;
            }
            TestStep::DeleteUser { username } => {
                self.ctx.users.delete_user(&username).await?;
            }
            TestStep::UserLogin { fixture } => {
                let persona = self.ctx.fixtures.user(&fixture)?;
                flows::user_login(self.browser().await?, &persona).await?;
            }
            TestStep::UserLogout => {
                flows::user_logout(self.browser().await?).await?;
            }
            TestStep::LoginWithCaptcha { role } => {
                let ctx = self.ctx;
                let credentials = ctx.config.site.credentials(role)?;
                flows::login_with_captcha(self.browser().await?, credentials).await?;
            }
            TestStep::UiCreateUser { role_label, as_fixture } => {
                let ctx = self.ctx;
                let account = flows::ui_create_user(self.browser().await?, &ctx.fixtures, &role_label, &as_fixture).await?;
                debug!("UI account {} created and cancelled", account.username);
            }
            TestStep::Drush { args, tolerate } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.ctx
                    .drush
                    .run(&args, exec_policy(tolerate), self.ctx.drush.timeout())
                    .await?
                    .into_result()?;
            }
            TestStep::Composer { args, tolerate } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.ctx.composer.run(&args, exec_policy(tolerate)).await?.into_result()?;
            }
            TestStep::Log { message } => {
                info!("[TEST LOG] {}", message);
            }
        }

        Ok(())
    }
}

fn exec_policy(tolerate: bool) -> ExecPolicy {
    if tolerate {
        ExecPolicy::Tolerate
    } else {
        ExecPolicy::Fatal
    }
}

fn assert_text(selector: &str, actual: &str, equals: Option<&str>, contains: Option<&str>) -> E2eResult<()> {
    if let Some(expected) = equals {
        if actual != expected {
            return Err(E2eError::AssertionFailed(format!(
                "{}: expected {:?}, found {:?}",
                selector, expected, actual
            )));
        }
    }
    if let Some(expected) = contains {
        if !actual.contains(expected) {
            return Err(E2eError::AssertionFailed(format!(
                "{}: {:?} does not contain {:?}",
                selector, actual, expected
            )));
        }
    }
    Ok(())
}
