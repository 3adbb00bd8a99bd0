//! `tapevaultd` — mounts the tape library at a given mount point, runs the
//! startup inventory reconciliation, and serves the auxiliary web view
//! alongside it.
//!
//! Grounded on the teacher's own daemon entry points (one `main` that
//! parses arguments with `clap`, initializes logging, builds the runtime
//! objects, and runs); `clap` is used directly here rather than the
//! teacher's internal API-schema-driven CLI macros, since those are bound
//! to the teacher's own REST API framework and have no standalone reuse.

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::sync::Mutex as AsyncMutex;

use tapevault::catalog::CatalogStore;
use tapevault::config::Config;
use tapevault::fs::VaultFs;
use tapevault::tape::changer::ChangerInterface;
use tapevault::tape::orchestrator::TapeOrchestrator;
use tapevault::tape::reconciler::Reconciler;
use tapevault::web;

#[derive(Parser, Debug)]
#[command(name = "tapevaultd", about = "On-demand tape library filesystem")]
struct Args {
    /// Directory to mount the tape library filesystem at.
    #[arg(long, default_value = "/mnt/tape-vault")]
    mount_point: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let config = Config::from_env();

    if let Err(err) = run(args, config) {
        error!("tapevaultd exiting: {err}");
        std::process::exit(1);
    }
}

fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let mut catalog = CatalogStore::open(&config.db_path)?;

    let changer = ChangerInterface::new(config.changer_device.clone());
    let orchestrator = TapeOrchestrator::new(&config);
    let reconciler = Reconciler::new(&changer, &orchestrator);
    if let Err(err) = reconciler.reconcile(&mut catalog) {
        error!("startup reconciliation failed: {err}");
    }

    let web_catalog = Arc::new(AsyncMutex::new(CatalogStore::open(&config.db_path)?));
    let web_port = config.web_port;
    let runtime = tokio::runtime::Runtime::new()?;
    let _web_handle = runtime.spawn(async move {
        if let Err(err) = web::serve(web_catalog, web_port).await {
            error!("web view stopped: {err}");
        }
    });

    info!("mounting tape vault at {}", args.mount_point);
    std::fs::create_dir_all(&args.mount_point)?;
    let fs = VaultFs::new(config, catalog);
    fuser::mount2(
        fs,
        &args.mount_point,
        &[
            fuser::MountOption::RO,
            fuser::MountOption::FSName("tapevault".to_string()),
        ],
    )?;

    Ok(())
}
