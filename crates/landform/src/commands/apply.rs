use crate::interrupt::Interrupt;
use crate::output;
use crate::project::Project;
use colored::Colorize;
use landform_cloud::{Engine, Plan, PlanOptions, StateLock};
use landform_core::ResourceGraph;

pub async fn handle(project: &Project, yes: bool, refresh: bool) -> anyhow::Result<bool> {
    let (declaration, graph) = project.load_graph()?;
    let engine = project.engine(&declaration)?;
    let lock = project.lock(&engine).await?;
    let interrupt = Interrupt::watch();

    let result = async {
        let plan = interrupt
            .abandon_on_interrupt(async {
                let plan = engine
                    .plan(
                        &graph,
                        &lock,
                        PlanOptions {
                            refresh,
                            destroy: false,
                        },
                    )
                    .await?;
                Ok::<_, anyhow::Error>(plan)
            })
            .await?;
        run(&engine, &plan, &graph, &lock, &interrupt, yes, "Apply these changes?").await
    }
    .await;

    lock.release().await?;
    result
}

/// `lock` を保持したままプランを表示・確認・実行
pub async fn run(
    engine: &Engine,
    plan: &Plan,
    graph: &ResourceGraph,
    lock: &StateLock,
    interrupt: &Interrupt,
    yes: bool,
    question: &str,
) -> anyhow::Result<bool> {
    output::print_plan(plan);
    if !plan.has_changes() {
        return Ok(true);
    }

    println!();
    if !yes
        && !interrupt
            .abandon_on_interrupt(output::confirm(question))
            .await?
    {
        println!("{}", "Cancelled.".yellow());
        return Ok(true);
    }

    let summary = engine.apply(plan, graph, lock, interrupt.token()).await?;
    output::print_summary(&summary);
    Ok(summary.is_success())
}
