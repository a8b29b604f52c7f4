use crate::project::Project;
use colored::Colorize;

pub async fn handle(project: &Project, token: &str) -> anyhow::Result<bool> {
    let store = project.store();
    let released = store.force_unlock(token).await?;

    println!(
        "{} lock held by {} (pid {}) since {}",
        "✓ Released".green().bold(),
        released.holder.cyan(),
        released.pid,
        released.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(true)
}
