//! Update command

use basalt::io::fetch::Fetcher;
use basalt::ops::{self, OpError};
use basalt::ui::Output;
use basalt::Paths;

pub async fn update(
    paths: &Paths,
    reporter: &Output,
    skip_gpg: bool,
    skip_download: bool,
) -> Result<(), OpError> {
    let fetcher = Fetcher::new(skip_gpg, skip_download)?;
    ops::update::update(paths, &fetcher, reporter).await
}
