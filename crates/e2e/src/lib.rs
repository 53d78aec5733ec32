//! cmsprobe E2E layer
//!
//! Browser-level checks for a Drupal site:
//! - Drives Playwright through a long-lived Node bridge, one browser per script
//! - Parses declarative YAML flow scripts with `${role.field}` placeholders
//! - Provisions and removes accounts through drush between browser steps
//! - Runs drush and composer commands as script steps
//! - Solves math CAPTCHAs on the login form
//! - Compares screenshots against local baselines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  cmsprobe runner (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── wait_for_site()                                      │
//! │    ├── run_specs(specs, skipped) -> TestSuiteResult         │
//! │    │     └── BrowserSession ── JSON lines ── driver.js      │
//! │    ├── UserClient, Drush, Composer for setup steps          │
//! │    └── VisualTester::compare(name) -> VisualDiff            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML)                                            │
//! │    ├── name, description, tags, viewport                    │
//! │    └── steps: visit, click, type, assert_*, solve_captcha,  │
//! │              screenshot, user_login, drush, composer, ...   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod flows;
pub mod playwright;
pub mod runner;
pub mod site;
pub mod spec;
pub mod visual;

pub use config::SuiteConfig;
pub use error::{E2eError, E2eResult};
pub use runner::{TestResult, TestRunner, TestSuiteResult};
pub use spec::{TestSpec, TestStep};
