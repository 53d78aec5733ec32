//! User account lifecycle through drush
//!
//! Creation and role assignment are separate drush calls, so for a moment
//! the account exists without its role. Both are tolerated (the account may
//! already exist); the `user:information` lookup that follows is fatal.

use tracing::info;

use crate::drush::Drush;
use crate::tool::{ExecOutcome, ExecPolicy};
use crate::error::Result;
use crate::fixture::FixtureStore;

/// Creates, checks and cancels accounts
#[derive(Debug, Clone)]
pub struct UserClient {
    drush: Drush,
    fixtures: FixtureStore,
}

impl UserClient {
    pub fn new(drush: Drush, fixtures: FixtureStore) -> Self {
        Self { drush, fixtures }
    }

    /// Create an account, grant it a role and verify it exists
    pub async fn create_user(&self, username: &str, password: &str, email: &str, role: &str) -> Result<()> {
        let mail = format!("--mail={}", email);
        let pass = format!("--password={}", password);

        self.drush
            .run(&["user:create", username, &mail, &pass], ExecPolicy::Tolerate, self.drush.timeout())
            .await?;

        self.drush
            .run(&["user:role:add", role, username], ExecPolicy::Tolerate, self.drush.timeout())
            .await?;

        self.drush
            .run(&["user:information", username], ExecPolicy::Fatal, self.drush.timeout())
            .await?
            .into_result()?;

        info!("User {} ready with role {}", username, role);
        Ok(())
    }

    /// Create the account described by `users/<key>.json`, returning its username
    pub async fn create_fixture_user(&self, key: &str) -> Result<String> {
        let fixture = self.fixtures.user(key)?;
        let username = fixture.username();
        self.create_user(&username, &fixture.password, &fixture.email, &fixture.role)
            .await?;
        Ok(username)
    }

    /// Cancel an account and delete its content
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        self.drush
            .run(
                &["-y", "user:cancel", "--delete-content", username],
                ExecPolicy::Fatal,
                self.drush.delete_timeout(),
            )
            .await?
            .into_result()?;

        info!("User {} cancelled", username);
        Ok(())
    }

    /// Cancel the account described by `users/<key>.json`
    pub async fn delete_fixture_user(&self, key: &str) -> Result<()> {
        let fixture = self.fixtures.user(key)?;
        self.delete_user(&fixture.username()).await
    }

    /// Whether drush can find the account
    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let outcome = self
            .drush
            .run(&["user:information", username], ExecPolicy::Tolerate, self.drush.timeout())
            .await?;
        Ok(matches!(outcome, ExecOutcome::Success(_)))
    }
}

/// Default e-mail address for an account created without one
pub fn default_email(username: &str) -> String {
    format!("{}@example.com", username)
}

/// Username unique to one test run, so concurrent scripts do not collide
pub fn unique_username(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}
