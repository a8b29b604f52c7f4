use crate::project::Project;
use colored::Colorize;

pub fn handle(project: &Project) -> anyhow::Result<bool> {
    println!("{}", "Validating declaration...".blue());

    let path = project.declaration_path()?;
    println!("Declaration: {}", project.relative(&path).display().to_string().cyan());

    let (declaration, graph) = project.load_graph()?;
    println!("{}", "✓ Declaration is valid".green().bold());
    println!();
    println!("Project: {}", declaration.name.cyan());

    if !declaration.providers.is_empty() {
        println!("  Providers: {}", declaration.providers.len());
        for name in declaration.providers.keys() {
            println!("    - {}", name.cyan());
        }
    }

    println!("  Resources: {}", graph.len());
    for address in graph.topological_order() {
        let Some(node) = graph.get(&address) else {
            continue;
        };
        let mut line = format!("    - {}", address.to_string().cyan());
        if !node.dependencies.is_empty() {
            let deps: Vec<String> = node.dependencies.iter().map(ToString::to_string).collect();
            line.push_str(&format!(" (after {})", deps.join(", ")));
        }
        if !node.enabled() {
            line.push_str(&format!(" {}", "[disabled]".dimmed()));
        }
        println!("{line}");
    }

    Ok(true)
}
