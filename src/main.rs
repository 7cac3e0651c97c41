use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use cal::DefaultAdapterFactory;
use clap::{Parser, Subcommand};
use config::{ResMgrConfig, DEFAULT_CONFIG_PATH};
use models::{ResourceRequest, ResourceType, ResourceUpdate};
use resmgr::ResourceMgrCore;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser, Debug)]
#[command(name = "resmgr", author, version, about = "NFV resource pool manager")]
struct Cli {
    /// Configuration file to load
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration, set up every account and pool, and print the pools
    Validate,

    /// Allocate one resource described by a YAML request file
    Allocate {
        /// Request file, tagged with `resource_type: compute | network`
        request: PathBuf,

        /// Cloud account to allocate from, defaults to the first configured one
        #[arg(long)]
        account: Option<String>,

        #[arg(long, default_value = "cli-event")]
        event_id: String,

        /// Release the resource again before exiting
        #[arg(long)]
        release: bool,
    },

    /// Print the JSON schema of allocation requests
    Schema,
}

fn init_tracing(config: &ResMgrConfig) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt::fmt().pretty();

    let subscriber = subscriber.with_max_level(config.logging.max_level);

    if let Some(output_file) = config.logging.log_file.clone() {
        let file = std::fs::File::create(&output_file)
            .with_context(|| format!("couldn't open log file {output_file}"))?;
        let file = std::sync::Mutex::new(file);

        let subscriber = subscriber.with_writer(file).finish();

        tracing::subscriber::set_global_default(subscriber).context("couldn't set up tracing")?;
    } else {
        let subscriber = subscriber.finish();

        tracing::subscriber::set_global_default(subscriber).context("couldn't set up tracing")?;
    };

    tracing::info!("tracing has been started");
    Ok(())
}

fn boot(
    config: &ResMgrConfig,
) -> anyhow::Result<(ResourceMgrCore, UnboundedReceiver<ResourceUpdate>)> {
    let (core, updates) = ResourceMgrCore::new(
        config.resource_manager.clone(),
        Arc::new(DefaultAdapterFactory),
    );

    for account in &config.cloud_accounts {
        core.configure_cloud_account(account)
            .with_context(|| format!("setting up cloud account {}", account.name))?;
    }

    Ok((core, updates))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn allocate(
    config: &ResMgrConfig,
    request: PathBuf,
    account: Option<String>,
    event_id: String,
    release: bool,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&request)
        .with_context(|| format!("couldn't read {}", request.display()))?;
    let request: ResourceRequest = serde_yaml::from_str(&raw)
        .with_context(|| format!("{} is not a valid request", request.display()))?;
    let resource_type = request.resource_type();

    let (core, mut updates) = boot(config)?;
    let account = match account.or_else(|| core.cloud_account_names().into_iter().next()) {
        Some(account) => account,
        None => bail!("no cloud account configured"),
    };

    let info = core
        .allocate_virtual_resource(&event_id, &account, request)
        .await?;
    print_json(&info)?;

    if resource_type == ResourceType::Compute && !info.resource_state().is_terminal() {
        tracing::info!("waiting for {} to settle", info.resource_id());
        if let Some(update) = updates.recv().await {
            print_json(&update)?;
        }
    }

    if release {
        core.release_virtual_resource(&event_id, resource_type).await?;
        tracing::info!("released {}", info.resource_id());
    }

    Ok(())
}

fn load_settings(path: &Path) -> anyhow::Result<&'static ResMgrConfig> {
    config::init_settings(path)
        .with_context(|| format!("couldn't load config file {}", path.display()))?;
    init_tracing(config::settings())?;
    Ok(config::settings())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Schema => print_json(&schemars::schema_for!(ResourceRequest))?,
        Command::Validate => {
            let settings = load_settings(&cli.config)?;
            let (core, _updates) = boot(settings)?;
            for account in core.cloud_account_names() {
                print_json(&core.list_pools(&account)?)?;
            }
        }
        Command::Allocate {
            request,
            account,
            event_id,
            release,
        } => {
            let settings = load_settings(&cli.config)?;
            allocate(settings, request, account, event_id, release).await?
        }
    }

    Ok(())
}
