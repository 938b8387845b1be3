use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Triggered after a table was loaded and before its watermark is written.
pub const LOAD_TABLE_BEFORE_WATERMARK_UPDATE: &str = "load_table.before_watermark_update";

/// Triggered before each chunk of rows is upserted.
pub const LOAD_TABLE_BEFORE_UPSERT: &str = "load_table.before_upsert";

/// Evaluates the fail point `name`, turning a configured `return` action into an error.
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |_| {
        bail!(
            ErrorKind::FailpointTriggered,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
