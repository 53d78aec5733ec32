//! drush invocation with per-operation timeouts

use std::time::Duration;

use crate::config::DrushConfig;
use crate::error::Result;
use crate::tool::{ExecOutcome, ExecPolicy, ToolRunner};

/// Runs drush through the configured argv prefix
#[derive(Debug, Clone)]
pub struct Drush {
    tool: ToolRunner,
    timeout: Duration,
    delete_timeout: Duration,
}

impl Drush {
    pub fn new(config: &DrushConfig) -> Self {
        Self {
            tool: ToolRunner::new(config.program(), config.working_dir.clone()),
            timeout: config.timeout(),
            delete_timeout: config.delete_timeout(),
        }
    }

    /// Timeout for ordinary invocations
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timeout for account cancellation
    pub fn delete_timeout(&self) -> Duration {
        self.delete_timeout
    }

    /// Run a drush subcommand under a policy and timeout
    pub async fn run(&self, args: &[&str], policy: ExecPolicy, timeout: Duration) -> Result<ExecOutcome> {
        self.tool.run(args, policy, timeout).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_command_prefixes_every_call() {
        let drush = Drush::new(&DrushConfig {
            command: Some(vec!["echo".to_string(), "drush".to_string()]),
            timeout_secs: 7,
            ..Default::default()
        });
        assert_eq!(drush.timeout(), Duration::from_secs(7));
        assert_eq!(drush.delete_timeout(), Duration::from_secs(120));

        let outcome = drush.run(&["status"], ExecPolicy::Fatal, drush.timeout()).await.unwrap();
        assert_eq!(outcome.output().stdout.trim(), "drush status");
    }
}
