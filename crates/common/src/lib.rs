//! cmsprobe command layer
//!
//! Session handling, JSON:API content provisioning, drush-driven user
//! lifecycle, composer and drush runners and the CAPTCHA solver shared by
//! the browser-level suite.

pub mod captcha;
pub mod composer;
pub mod config;
pub mod drush;
pub mod error;
pub mod fixture;
pub mod jsonapi;
pub mod session;
pub mod tool;
pub mod users;

// Re-export commonly used types
pub use composer::Composer;
pub use config::{ComposerConfig, Credentials, DrushConfig, LocalEnv, Role, SiteConfig};
pub use drush::Drush;
pub use error::{Error, Result};
pub use fixture::{FixtureStore, UserFixture};
pub use jsonapi::{ContentClient, Resource};
pub use session::{is_login_redirect, CsrfToken, Session, SessionManager};
pub use tool::{ExecOutcome, ExecOutput, ExecPolicy, ToolRunner};
pub use users::{unique_username, UserClient};
