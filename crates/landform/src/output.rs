use colored::Colorize;
use landform_cloud::{ApplySummary, Change, ChangeKind, Plan};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// プランの変更内容とサマリーを表示
pub fn print_plan(plan: &Plan) {
    if !plan.has_changes() {
        println!("{}", "No changes. Infrastructure matches the declaration.".green());
        return;
    }

    println!("{}", "Planned changes:".bold());
    for change in plan.changes.iter().filter(|c| !c.is_noop()) {
        print_change(change);
    }
    println!();
    println!("Plan: {}", plan.summary().to_string().bold());
}

fn print_change(change: &Change) {
    let address = change.address.to_string();
    match change.kind {
        ChangeKind::Create => println!("  {} {}", "+".green().bold(), address.green()),
        ChangeKind::Destroy => println!("  {} {}", "-".red().bold(), address.red()),
        ChangeKind::UpdateInPlace => {
            println!("  {} {}", "~".yellow().bold(), address.yellow());
            for field in &change.changed {
                let note = if change.unknown.contains(field) {
                    " (known after apply)"
                } else {
                    ""
                };
                println!("      {field}{}", note.dimmed());
            }
        }
        ChangeKind::Replace => {
            println!("  {} {}", "-/+".magenta().bold(), address.magenta());
            for field in &change.forces_replacement {
                println!("      {field} {}", "(forces replacement)".dimmed());
            }
            if change.forces_replacement.is_empty() {
                println!("      {}", format!("provider -> {}", change.provider).dimmed());
            }
        }
        ChangeKind::NoOp => {}
    }
}

pub fn print_summary(summary: &ApplySummary) {
    println!();
    for step in &summary.failed {
        println!(
            "  {} {} {}: {}",
            "✗".red().bold(),
            step.action,
            step.address.to_string().cyan(),
            step.reason.as_deref().unwrap_or_default()
        );
    }
    for step in &summary.skipped {
        println!(
            "  {} {} {} ({})",
            "⏭".yellow(),
            step.action,
            step.address.to_string().cyan(),
            step.reason.as_deref().unwrap_or_default()
        );
    }

    let line = format!(
        "Apply finished in {:.1}s: {}",
        summary.duration.as_secs_f64(),
        summary
    );
    if summary.is_success() {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }
}

/// インフラ変更前に確認する
///
/// 割り込みでプロンプトを中断できるよう非同期に読み込む。
pub async fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N]: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut input).await?;
    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}
