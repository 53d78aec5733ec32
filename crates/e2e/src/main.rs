//! cmsprobe - run UI flow scripts against a Drupal site

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use cmsprobe_e2e::{SuiteConfig, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "cmsprobe")]
#[command(author, version, about = "E2E checks for a Drupal site", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "CMSPROBE_CONFIG", default_value = "cmsprobe.toml")]
    config: PathBuf,

    /// Site under test (overrides the config file)
    #[arg(long, env = "CMSPROBE_BASE_URL")]
    base_url: Option<String>,

    /// Path to flow scripts directory
    #[arg(short, long)]
    specs: Option<PathBuf>,

    /// Run only scripts carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the script with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Scripts run at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Copy this run's screenshots over the baselines
    #[arg(long)]
    update_baselines: bool,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> anyhow::Result<bool> {
    let mut config = SuiteConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(base_url) = args.base_url {
        config.site.base_url = base_url;
    }
    if let Some(specs) = args.specs {
        config.specs_dir = specs;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.visual.update_baselines |= args.update_baselines;

    let update_baselines = config.visual.update_baselines;
    let runner = TestRunner::new(config).context("invalid configuration")?;

    runner.wait_for_site().await?;

    let results = if let Some(name) = args.name {
        runner.run_test(&name).await?
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag).await?
    } else {
        runner.run_all().await?
    };

    if update_baselines {
        runner.update_baselines()?;
    }

    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
