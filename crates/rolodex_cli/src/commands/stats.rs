use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::commands::output::{OutputFormat, print_stats};
use crate::commands::shared::build_service;
use crate::config::Config;

pub(crate) async fn handle_stats(
    output: OutputFormat,
    config: &Config,
    db: Arc<DatabaseConnection>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(config, db, CancellationToken::new(), None)?;
    let stats = service.get_mirror_stats().await?;
    print_stats(&stats, output);
    Ok(())
}
