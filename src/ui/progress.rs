//! Spinners and build progress bars with a plain-text fallback

use super::context::UiContext;
use crate::build::{BuildEvent, BuildState};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";
const TICK: Duration = Duration::from_millis(120);

/// A single-task spinner
pub struct TaskSpinner {
    spinner: Option<ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars(TICK_CHARS),
            );
            spinner.set_message(message.to_string());
            spinner.enable_steady_tick(TICK);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => {
                spinner.finish_and_clear();
                println!("{} {}", style("✓").green(), message);
            }
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => {
                spinner.finish_and_clear();
                println!("{} {}", style("✗").red(), message);
            }
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// Progress of one or more concurrent builds, fed by orchestrator events.
///
/// Interactive terminals get one bar per image; otherwise each step start
/// and finish is printed as a line.
pub struct BuildProgress {
    multi: Option<MultiProgress>,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, images: &[String]) -> Self {
        let mut bars = HashMap::new();
        let multi = if ctx.use_fancy_output() {
            let multi = MultiProgress::new();
            let width = images.iter().map(String::len).max().unwrap_or(0);
            for image in images {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(
                    ProgressStyle::with_template(
                        "  {spinner:.cyan} {prefix:.bold}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .tick_chars(TICK_CHARS)
                    .progress_chars("━╸─"),
                );
                bar.set_prefix(format!("{:<width$}", image, width = width));
                bar.enable_steady_tick(TICK);
                bars.insert(image.clone(), bar);
            }
            Some(multi)
        } else {
            None
        };

        Self {
            multi,
            bars: Mutex::new(bars),
        }
    }

    fn with_bar(&self, image: &str, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(image) {
                f(bar);
            }
        }
    }

    pub fn on_event(&self, event: &BuildEvent) {
        let fancy = self.multi.is_some();
        match event {
            BuildEvent::StepStarted {
                image,
                index,
                total,
                description,
            } => {
                if fancy {
                    self.with_bar(image, |bar| {
                        bar.set_length(*total as u64);
                        bar.set_position(*index as u64);
                        bar.set_message(description.clone());
                    });
                } else {
                    println!("[{}] {}/{} {}", image, index + 1, total, description);
                }
            }
            BuildEvent::StepFinished {
                image,
                index,
                outcome,
                attempts,
            } => {
                if fancy {
                    self.with_bar(image, |bar| bar.set_position(*index as u64 + 1));
                } else if *attempts > 1 {
                    println!("[{}]   {} after {} attempts", image, outcome, attempts);
                } else {
                    println!("[{}]   {}", image, outcome);
                }
            }
            BuildEvent::State {
                image,
                state: BuildState::Retrying { attempt, .. },
            } => {
                let message = format!("retrying, attempt {}", attempt);
                if fancy {
                    self.with_bar(image, |bar| bar.set_message(message));
                } else {
                    println!("[{}]   {}", image, message);
                }
            }
            BuildEvent::State { image, state } if state.is_terminal() => {
                self.with_bar(image, |bar| bar.finish_and_clear());
            }
            BuildEvent::State { image, state } => {
                if fancy {
                    self.with_bar(image, |bar| bar.set_message(state.to_string()));
                }
            }
            BuildEvent::Output { image, line } => {
                let line = line.trim();
                if fancy && !line.is_empty() {
                    let display = console::truncate_str(line, 60, "...").to_string();
                    self.with_bar(image, |bar| bar.set_message(display));
                }
            }
        }
    }

    /// Clear any bar still on screen
    pub fn finish(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.values() {
                bar.finish_and_clear();
            }
        }
        if let Some(multi) = &self.multi {
            let _ = multi.clear();
        }
    }
}
