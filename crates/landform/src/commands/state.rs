use crate::project::Project;
use anyhow::Context;
use colored::Colorize;
use landform_core::Address;

pub async fn list(project: &Project) -> anyhow::Result<bool> {
    let store = project.store();
    let lock = store.acquire_lock(project.settings.lock_timeout()).await?;
    let snapshot = store.read_all(&lock).await;
    lock.release().await?;
    let snapshot = snapshot?;

    if snapshot.is_empty() {
        println!("{}", "No resources in state.".dimmed());
        return Ok(true);
    }

    for record in snapshot.iter() {
        println!(
            "{}  {}  {}",
            record.address.to_string().cyan(),
            record.id,
            record.provider.dimmed()
        );
    }
    Ok(true)
}

pub async fn show(project: &Project, address: &str) -> anyhow::Result<bool> {
    let address: Address = address.parse()?;
    let store = project.store();
    let lock = store.acquire_lock(project.settings.lock_timeout()).await?;
    let snapshot = store.read_all(&lock).await;
    lock.release().await?;
    let snapshot = snapshot?;

    let record = snapshot
        .get(&address)
        .with_context(|| format!("{address} is not in state"))?;

    println!("{} {}", "#".dimmed(), record.address.to_string().cyan().bold());
    println!("id          = {}", record.id);
    println!("provider    = {}", record.provider);
    println!("created_at  = {}", record.created_at.to_rfc3339());
    println!("updated_at  = {}", record.updated_at.to_rfc3339());
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
        println!("depends_on  = {}", deps.join(", "));
    }
    println!("inputs      = {}", serde_json::to_string_pretty(&record.inputs)?);
    println!("outputs     = {}", serde_json::to_string_pretty(&record.outputs)?);
    Ok(true)
}
