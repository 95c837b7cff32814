//! Install command

use basalt::io::fetch::Fetcher;
use basalt::ops::{self, OpError};
use basalt::ui::Output;
use basalt::Paths;

pub async fn install(
    paths: &Paths,
    reporter: &Output,
    targets: &[String],
    force: bool,
    skip_gpg: bool,
    skip_download: bool,
) -> Result<(), OpError> {
    let fetcher = Fetcher::new(skip_gpg, skip_download)?;
    ops::install::install(paths, &fetcher, reporter, targets, force).await
}
