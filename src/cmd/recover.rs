//! Recover command: clean up after an interrupted transaction.

use basalt::ops::OpError;
use basalt::store::transaction;
use basalt::ui::{Output, Reporter};
use basalt::Paths;

pub fn recover(paths: &Paths, reporter: &Output) -> Result<(), OpError> {
    let db_path = paths.db_path();
    if !transaction::recovery_pending(&db_path) {
        reporter.info("no interrupted transaction found");
        return Ok(());
    }

    let removed = transaction::recover(&db_path)?;
    reporter.info(&format!(
        "recovered interrupted transaction: removed {removed} staged file(s)"
    ));
    Ok(())
}
