//! History command - show persisted build records

use crate::build::{BuildHistory, BuildResult, BuildStatus};
use crate::cli::args::{HistoryArgs, OutputFormat};
use crate::error::{SandkitError, SandkitResult};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the history command
pub async fn execute(args: HistoryArgs) -> SandkitResult<()> {
    let history = BuildHistory::default_location();

    if let Some(image) = args.image {
        let record = history
            .load(&image)
            .await?
            .ok_or_else(|| SandkitError::User(format!("No build recorded for {}", image)))?;
        return match args.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&record)?);
                Ok(())
            }
            _ => {
                print_detail(&record);
                Ok(())
            }
        };
    }

    let records = history.list_all().await?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Plain => {
            for record in &records {
                println!("{}", record.image_name);
            }
        }
        OutputFormat::Table if records.is_empty() => {
            ui::step_info(&UiContext::detect(), "No builds recorded yet");
        }
        OutputFormat::Table => print_table(&records),
    }
    Ok(())
}

fn status_styled(status: BuildStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        BuildStatus::Succeeded => style(text).green(),
        BuildStatus::Failed => style(text).red(),
        BuildStatus::Cancelled => style(text).yellow(),
    }
}

fn print_table(records: &[BuildResult]) {
    println!(
        "{:<12} {:<10} {:<11} {:<6} {:<18} {}",
        style("IMAGE").bold(),
        style("BUILD").bold(),
        style("STATUS").bold(),
        style("STEPS").bold(),
        style("FINISHED").bold(),
        style("DETAIL").bold()
    );
    println!("{}", "-".repeat(80));

    for record in records {
        let detail = match (&record.image, &record.failed_step) {
            (Some(image), _) => image.tag.clone(),
            (None, Some(failed)) => failed.kind.to_string(),
            (None, None) => String::new(),
        };
        println!(
            "{:<12} {:<10} {:<11} {:<6} {:<18} {}",
            record.image_name,
            record.short_id(),
            status_styled(record.status),
            record.succeeded_steps.len(),
            record.finished_at.format("%Y-%m-%d %H:%M"),
            detail
        );
    }
}

fn print_detail(record: &BuildResult) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("{} ({})", record.image_name, record.build_id));
    ui::key_value(&ctx, "status", &status_styled(record.status).to_string());
    ui::key_value(&ctx, "started", &record.started_at.to_rfc3339());
    ui::key_value(
        &ctx,
        "duration",
        &format!("{:.1}s", record.duration().num_milliseconds() as f64 / 1000.0),
    );

    if let Some(image) = &record.image {
        ui::key_value(&ctx, "image", &image.tag);
        if let Some(id) = &image.image_id {
            ui::key_value(&ctx, "image id", id);
        }
        let ports: Vec<String> = image.exposed_ports.iter().map(u16::to_string).collect();
        ui::key_value(&ctx, "ports", &ports.join(", "));
        ui::key_value(&ctx, "workdir", &image.workdir);
        ui::key_value(&ctx, "entrypoint", &record.final_entrypoint.join(" "));
    }

    println!();
    for step in &record.succeeded_steps {
        ui::step_ok_detail(
            &ctx,
            &step.description,
            &format!("{}, {} attempt(s)", step.outcome, step.attempts),
        );
    }
    if let Some(failed) = &record.failed_step {
        let label = failed.step_id.as_deref().unwrap_or("build");
        ui::step_error_detail(&ctx, label, &failed.kind.to_string());
        for line in failed.message.lines().take(20) {
            ui::remark(&ctx, line);
        }
    }

    println!();
    let states: Vec<String> = record.transitions.iter().map(|t| t.state.to_string()).collect();
    ui::key_value(&ctx, "transitions", &states.join(" -> "));
}
