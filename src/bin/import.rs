//! `ratedb-import <dir>`: load the CSV dump in `<dir>` into the configured store.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use ratedb::{import, repo, AppConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let dir: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: ratedb-import <csv-dir>")?;
    let settings = AppConfig::from_env()?;
    let repo = repo::from_config(&settings).await?;

    let report = import::import_dir(repo.as_ref(), &dir)
        .await
        .with_context(|| format!("importing {}", dir.display()))?;
    for f in &report.files {
        info!("{:<16} inserted {:>5}  skipped {:>5}", f.file, f.inserted, f.skipped);
    }
    Ok(())
}
