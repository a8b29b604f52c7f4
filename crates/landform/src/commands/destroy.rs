use crate::commands::apply;
use crate::interrupt::Interrupt;
use crate::project::Project;
use landform_core::ResourceGraph;

pub async fn handle(project: &Project, yes: bool) -> anyhow::Result<bool> {
    let declaration = project.load()?;
    let engine = project.engine(&declaration)?;
    let lock = project.lock(&engine).await?;
    let interrupt = Interrupt::watch();

    let result = async {
        let plan = interrupt
            .abandon_on_interrupt(async { Ok::<_, anyhow::Error>(engine.plan_destroy(&lock).await?) })
            .await?;
        apply::run(
            &engine,
            &plan,
            &ResourceGraph::default(),
            &lock,
            &interrupt,
            yes,
            "Destroy every managed resource?",
        )
        .await
    }
    .await;

    lock.release().await?;
    result
}
