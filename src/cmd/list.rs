//! List command

use basalt::core::package::InstallReason;
use basalt::ops::OpError;
use basalt::store::db::Database;
use basalt::Paths;

pub fn list(paths: &Paths) -> Result<(), OpError> {
    let db = Database::open(&paths.db_path())?;
    for pkg in db.list_all()? {
        let mut line = format!("{} {}", pkg.name, pkg.version);
        if pkg.reason == InstallReason::Dependency {
            line.push_str(" (dependency)");
        }
        if pkg.broken {
            line.push_str(" [broken]");
        }
        println!("{line}");
    }
    Ok(())
}
