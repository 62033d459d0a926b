//! Catalog command - list installable tools

use crate::catalog::{ToolCatalog, ToolSpec};
use crate::cli::args::{CatalogArgs, OutputFormat};
use crate::error::SandkitResult;
use console::style;

/// Execute the catalog command
pub async fn execute(args: CatalogArgs) -> SandkitResult<()> {
    let tools: Vec<&ToolSpec> = ToolCatalog::global().tools().collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tools)?),
        OutputFormat::Plain => {
            for tool in &tools {
                println!("{}@{}", tool.name, tool.version);
            }
        }
        OutputFormat::Table => print_table(&tools),
    }
    Ok(())
}

fn print_table(tools: &[&ToolSpec]) {
    println!(
        "{:<12} {:<10} {:<18} {:<22} {}",
        style("TOOL").bold(),
        style("VERSION").bold(),
        style("METHOD").bold(),
        style("CACHE KEY").bold(),
        style("PATH").bold()
    );
    println!("{}", "-".repeat(90));

    for tool in tools {
        println!(
            "{:<12} {:<10} {:<18} {:<22} {}",
            tool.name,
            tool.version,
            tool.method.label(),
            tool.cache_key(),
            tool.path_hint
        );
    }

    println!();
    println!("{} tool(s)", tools.len());
}
