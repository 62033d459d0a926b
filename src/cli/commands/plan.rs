//! Plan command - show resolved steps without building

use crate::catalog::ToolCatalog;
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::error::{SandkitError, SandkitResult};
use crate::plan::{resolve, Step};
use crate::spec::ImageSpec;
use console::style;

/// Execute the plan command
pub async fn execute(args: PlanArgs) -> SandkitResult<()> {
    if args.list {
        list_builtins(args.format)?;
        return Ok(());
    }

    let name = args
        .spec
        .ok_or_else(|| SandkitError::User("no spec given".to_string()))?;
    let spec = ImageSpec::load(&name).await?;
    let steps = resolve(&spec, ToolCatalog::global())?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
        OutputFormat::Plain => {
            for step in &steps {
                println!("{}", step.id);
            }
        }
        OutputFormat::Table => print_table(&spec, &steps),
    }
    Ok(())
}

fn list_builtins(format: OutputFormat) -> SandkitResult<()> {
    let mut specs = Vec::new();
    for name in ImageSpec::builtin_names() {
        if let Some(spec) = ImageSpec::builtin(name)? {
            specs.push(spec);
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&specs)?),
        OutputFormat::Plain => {
            for spec in &specs {
                println!("{}", spec.name);
            }
        }
        OutputFormat::Table => {
            println!(
                "{:<10} {:<16} {}",
                style("NAME").bold(),
                style("BASE").bold(),
                style("DESCRIPTION").bold()
            );
            for spec in &specs {
                println!("{:<10} {:<16} {}", spec.name, spec.base_image, spec.description);
            }
        }
    }
    Ok(())
}

fn print_table(spec: &ImageSpec, steps: &[Step]) {
    println!("{} {} (from {})", style("Image").bold(), spec.name, spec.base_image);
    println!();
    println!(
        "{:<4} {:<28} {:<16} {}",
        style("#").bold(),
        style("STEP").bold(),
        style("ACTION").bold(),
        style("CACHES").bold()
    );
    println!("{}", "-".repeat(80));

    for step in steps {
        let caches = step
            .mounts
            .iter()
            .map(|m| m.key.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<4} {:<28} {:<16} {}",
            step.index + 1,
            step.id,
            step.action.label(),
            if caches.is_empty() { "-".to_string() } else { caches }
        );
    }

    println!();
    println!("{} step(s)", steps.len());
}
