//! Removal of task directories left behind by a previous process.

use std::path::Path;

use leech_protocol::TaskId;
use tracing::{info, warn};

use crate::registry::TaskRegistry;

/// Deletes every `<work_dir>/<owner>/<task>` directory that no registered
/// task owns, then any owner directory left empty. Returns how many task
/// directories were removed.
pub async fn sweep_orphans(work_dir: &Path, registry: &TaskRegistry) -> std::io::Result<usize> {
    let mut owners = match tokio::fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(owner_entry) = owners.next_entry().await? {
        if !owner_entry.file_type().await?.is_dir() {
            continue;
        }
        let owner_dir = owner_entry.path();

        let mut tasks = tokio::fs::read_dir(&owner_dir).await?;
        while let Some(task_entry) = tasks.next_entry().await? {
            let live = task_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<TaskId>().ok())
                .is_some_and(|id| registry.contains(id));
            if live {
                continue;
            }

            let path = task_entry.path();
            let result = if task_entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    info!(path = %path.display(), "removed orphaned task artifacts");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove orphan"),
            }
        }

        // Only succeeds when the owner has no live task left.
        let _ = tokio::fs::remove_dir(&owner_dir).await;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leech_protocol::{OwnerId, Source};

    #[tokio::test]
    async fn missing_work_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TaskRegistry::default();
        let n = sweep_orphans(&dir.path().join("nope"), &reg).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn removes_only_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TaskRegistry::default();
        let live = reg.register(OwnerId(1), Source::new("https://x/y")).unwrap();

        let live_dir = dir.path().join("1").join(live.to_string());
        let orphan_dir = dir.path().join("1").join(TaskId::new().to_string());
        let junk_dir = dir.path().join("1").join("not-a-task");
        let other_owner = dir.path().join("2").join(TaskId::new().to_string());
        for d in [&live_dir, &orphan_dir, &junk_dir, &other_owner] {
            std::fs::create_dir_all(d).unwrap();
            std::fs::write(d.join("data.bin"), b"x").unwrap();
        }
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let n = sweep_orphans(dir.path(), &reg).await.unwrap();
        assert_eq!(n, 3);

        assert!(live_dir.join("data.bin").exists());
        assert!(!orphan_dir.exists());
        assert!(!junk_dir.exists());
        assert!(!dir.path().join("2").exists(), "empty owner dir is removed");
        assert!(dir.path().join("stray.txt").exists());
    }
}
