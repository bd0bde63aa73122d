mod app;
mod config;
mod domain;
mod logging;
mod repo;
mod ui;
mod usecase;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;

use app::App;
use config::{AccountConfig, Config, ConfigError};
use repo::auth::{resolve_azure_pat, resolve_github_token};
use repo::azure::AzureDevOpsBackend;
use repo::github::GithubBackend;
use repo::memory::demo_accounts;
use usecase::fetch::{Account, ReviewSource};
use usecase::refresh::RefreshEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "pr-dash: pull requests waiting on your review", long_about = None)]
struct Args {
    /// Path to the JSON config (default: OS config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show canned demo accounts instead of the configured ones
    #[arg(long, default_value_t = false)]
    demo: bool,

    /// Tick interval of render loop in milliseconds
    #[arg(long, default_value_t = 120)]
    tick_ms: u64,

    /// Path to the log file (default: OS data dir)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_path = args.log_file.clone().unwrap_or_else(logging::default_log_path);
    logging::init_logging(&log_path)?;

    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound { .. }) if args.demo => Config {
            demo: true,
            refresh_interval_minutes: None,
            accounts: Vec::new(),
        },
        Err(e) => return Err(e.into()),
    };
    let demo = args.demo || config.demo;
    let interval = config.refresh_interval();

    let accounts = if demo {
        demo_accounts()
    } else {
        config
            .accounts
            .iter()
            .map(build_account)
            .collect::<Result<Vec<_>>>()?
    };
    info!(
        event = "dash.startup",
        demo,
        accounts = ?accounts.iter().map(Account::name).collect::<Vec<_>>(),
        interval_secs = interval.as_secs()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let (stats_tx, stats_rx) = unbounded_channel();
    let source = Arc::new(ReviewSource::new(accounts, stats_tx));
    let engine = RefreshEngine::new(runtime.handle().clone(), source, interval);
    let mut app = App::new(engine, stats_rx);
    app.refresh();

    let res = ui::run(app, Duration::from_millis(args.tick_ms));
    runtime.shutdown_timeout(Duration::from_secs(1));
    res
}

fn build_account(cfg: &AccountConfig) -> Result<Account> {
    let name = cfg.display_name();
    let account = match cfg {
        AccountConfig::AzureDevops {
            org_url,
            project,
            repository,
            pat,
            ..
        } => {
            let pat = resolve_azure_pat(pat.as_deref())
                .with_context(|| format!("account '{name}'"))?;
            let backend =
                AzureDevOpsBackend::new(org_url, project.clone(), repository.clone(), pat)?;
            Account::new(name, backend)
        }
        AccountConfig::Github {
            token, api_base, ..
        } => {
            let token = resolve_github_token(token.as_deref(), api_base.as_deref())
                .with_context(|| format!("account '{name}'"))?;
            Account::new(name, GithubBackend::new(token, api_base.clone()))
        }
    };
    Ok(account)
}
