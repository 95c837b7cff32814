//! Sync command: refresh repository indices.

use basalt::core::repo;
use basalt::io::fetch::Fetcher;
use basalt::ops::OpError;
use basalt::ui::{Output, Reporter};
use basalt::Paths;

pub async fn sync(
    paths: &Paths,
    reporter: &Output,
    skip_gpg: bool,
    skip_download: bool,
) -> Result<(), OpError> {
    let repos = repo::load_repolist(&paths.repolist_path())?;
    if repos.iter().filter(|r| r.enabled).count() == 0 {
        reporter.warning("no enabled repositories in repolist");
        return Ok(());
    }

    let fetcher = Fetcher::new(skip_gpg, skip_download)?;
    let indices = fetcher.sync_indices(&repos, &paths.state_dir()).await?;

    for (repo, index) in &indices {
        let generated = chrono::DateTime::from_timestamp(index.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| index.timestamp.to_string());
        reporter.info(&format!(
            "{}: {} packages (generated {generated})",
            repo.id, index.count
        ));
    }
    reporter.info(&format!("{} repositories synced", indices.len()));
    Ok(())
}
