//! Audit command

use basalt::ops::{self, OpError};
use basalt::ui::Output;
use basalt::Paths;

pub fn audit(paths: &Paths, reporter: &Output) -> Result<(), OpError> {
    ops::audit::audit(paths, reporter).map(|_| ())
}
