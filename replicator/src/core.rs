use config::shared::PipelineConfig;
use etl::pipeline::{RunOptions, run_etl};
use etl::report::{RunStatus, TableStatus};
use tracing::{error, info, warn};

/// Runs one extract-load and logs its report.
///
/// Returns whether every table succeeded. Table failures are already captured in the report,
/// so only failing to render the report is an error.
pub async fn run_extract_load(config: &PipelineConfig, options: RunOptions) -> anyhow::Result<bool> {
    info!(
        source = %config.source,
        target = %config.target,
        tables = ?options.tables.as_ref().unwrap_or(&config.tables),
        "starting extract-load"
    );

    let report = run_etl(config, options).await;

    for (table, outcome) in report.tables().iter() {
        match outcome.status {
            TableStatus::Error => warn!(
                table,
                error = outcome.error.as_deref().unwrap_or_default(),
                "table failed"
            ),
            _ => info!(
                table,
                status = ?outcome.status,
                rows_extracted = outcome.rows_extracted,
                rows_loaded = outcome.rows_loaded,
                "table outcome"
            ),
        }
    }

    let rendered = serde_json::to_string(&report)?;
    match report.status() {
        RunStatus::Success => info!(report = %rendered, "extract-load succeeded"),
        RunStatus::Partial => warn!(report = %rendered, "extract-load partially failed"),
        RunStatus::Failed => error!(report = %rendered, "extract-load failed"),
    }

    Ok(report.is_success())
}
