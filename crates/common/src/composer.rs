//! composer invocation in the project root

use std::time::Duration;

use crate::config::ComposerConfig;
use crate::error::Result;
use crate::tool::{ExecOutcome, ExecPolicy, ToolRunner};

/// Runs composer through the configured argv prefix
#[derive(Debug, Clone)]
pub struct Composer {
    tool: ToolRunner,
    timeout: Duration,
}

impl Composer {
    pub fn new(config: &ComposerConfig) -> Self {
        Self {
            tool: ToolRunner::new(config.program(), config.working_dir.clone()),
            timeout: config.timeout(),
        }
    }

    /// Run a composer command, e.g. `["require", "drupal/token"]`
    pub async fn run(&self, args: &[&str], policy: ExecPolicy) -> Result<ExecOutcome> {
        self.tool.run(args, policy, self.timeout).await
    }
}
