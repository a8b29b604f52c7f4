use crate::interrupt::Interrupt;
use crate::output;
use crate::project::Project;
use landform_cloud::PlanOptions;

pub async fn handle(project: &Project, refresh: bool, destroy: bool) -> anyhow::Result<bool> {
    let (declaration, graph) = project.load_graph()?;
    let engine = project.engine(&declaration)?;
    let lock = project.lock(&engine).await?;
    let interrupt = Interrupt::watch();

    let plan = interrupt
        .abandon_on_interrupt(async {
            Ok::<_, anyhow::Error>(
                engine
                    .plan(&graph, &lock, PlanOptions { refresh, destroy })
                    .await?,
            )
        })
        .await;
    lock.release().await?;

    output::print_plan(&plan?);
    Ok(true)
}
