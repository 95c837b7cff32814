//! Remove command

use basalt::ops::{self, OpError};
use basalt::ui::Output;
use basalt::Paths;

pub fn remove(
    paths: &Paths,
    reporter: &Output,
    package: &str,
    yes: bool,
    force: bool,
) -> Result<(), OpError> {
    ops::remove::remove(paths, reporter, package, yes, force)
}
