//! Build command - provision and commit sandbox images

use crate::audit::AuditLog;
use crate::build::{BuildHistory, BuildResult, BuildStatus, Orchestrator};
use crate::cli::args::{BuildArgs, OutputFormat};
use crate::config::Config;
use crate::error::{SandkitError, SandkitResult};
use crate::executor::HttpFetcher;
use crate::orchestration::create_runtime;
use crate::spec::ImageSpec;
use crate::ui::{self, BuildProgress, TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::{debug, warn};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> SandkitResult<()> {
    let ctx = UiContext::detect();

    let mut specs = Vec::with_capacity(args.specs.len());
    for name in &args.specs {
        specs.push(ImageSpec::load(name).await?);
    }

    let table = args.format == OutputFormat::Table;
    let runtime = create_runtime(&config.runtime)?;
    let mut spinner = TaskSpinner::new(&ctx);
    if table {
        spinner.start(&format!("Checking {}...", runtime.runtime_name()));
    }
    if !runtime.is_available().await? {
        if table {
            spinner.stop_error(&format!("{} not available", runtime.runtime_name()));
        }
        return Err(SandkitError::RuntimeNotFound(format!(
            "{} is not installed or not on PATH",
            runtime.runtime_name()
        )));
    }
    if table {
        spinner.stop(&format!("Using {}", runtime.runtime_name()));
    }
    debug!("Using runtime: {}", runtime.runtime_name());

    let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
    let progress = Arc::new(BuildProgress::new(&ctx, if table { names.as_slice() } else { &[] }));
    let sink = Arc::clone(&progress);

    let mut orchestrator =
        Orchestrator::from_config(config, runtime, Arc::new(HttpFetcher::new(&config.fetch)))
            .keep_failed(args.keep_failed || config.runtime.keep_failed);
    // Structured formats keep stdout for the results alone
    if table {
        orchestrator = orchestrator.on_event(move |event| sink.on_event(event));
    }

    // Ctrl-C stops every build at its next step boundary
    let token = orchestrator.cancel_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling at the next step boundary");
            token.cancel();
        }
    });

    let audit = AuditLog::new(config);
    for spec in &specs {
        audit.build_started(&spec.name, &spec.base_image).await;
    }

    if table {
        ui::intro(&ctx, &format!("Building {}", names.join(", ")));
    }
    let results = orchestrator.build_many(&specs).await;
    progress.finish();
    signal.abort();

    let history = BuildHistory::default_location();
    for result in &results {
        audit.build_finished(result).await;
        if let Err(e) = history.save(result).await {
            warn!("Failed to save build record for {}: {}", result.image_name, e);
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Plain => {
            for result in &results {
                println!("{} {}", result.image_name, result.status);
            }
        }
        OutputFormat::Table => {
            for result in &results {
                print_result(&ctx, result);
            }
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed == 0 {
        if table {
            ui::outro_success(&ctx, &format!("{} image(s) built", results.len()));
        }
        Ok(())
    } else {
        if table {
            ui::outro_error(&ctx, &format!("{} build(s) need attention", failed));
        }
        Err(SandkitError::User(format!(
            "{} of {} build(s) did not succeed",
            failed,
            results.len()
        )))
    }
}

fn print_result(ctx: &UiContext, result: &BuildResult) {
    let seconds = result.duration().num_milliseconds() as f64 / 1000.0;
    match result.status {
        BuildStatus::Succeeded => {
            let tag = result.image.as_ref().map(|m| m.tag.as_str()).unwrap_or_default();
            ui::step_ok_detail(ctx, &result.image_name, &format!("{} in {:.1}s", tag, seconds));
        }
        BuildStatus::Cancelled => {
            ui::step_warn_hint(
                ctx,
                &format!("{} cancelled", result.image_name),
                "completed caches are kept",
            );
        }
        BuildStatus::Failed => {
            let detail = result
                .failed_step
                .as_ref()
                .map(|f| match &f.step_id {
                    Some(id) => format!("{} failed with {} after {} attempt(s)", id, f.kind, f.attempts),
                    None => format!("failed with {}", f.kind),
                })
                .unwrap_or_else(|| "failed".to_string());
            ui::step_error_detail(ctx, &result.image_name, &detail);
            if let Some(failed) = &result.failed_step {
                for line in failed.message.lines().take(20) {
                    ui::remark(ctx, line);
                }
            }
        }
    }

    for step in &result.succeeded_steps {
        let note = if step.attempts > 1 {
            format!("{} ({} attempts)", step.outcome, step.attempts)
        } else {
            step.outcome.to_string()
        };
        ui::remark(ctx, &format!("{:>2}. {:<36} {}", step.index + 1, step.description, note));
    }
}
