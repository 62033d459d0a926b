//! Confirmation prompts

use super::context::UiContext;
use crate::error::{SandkitError, SandkitResult};

/// Ask a yes/no question.
///
/// Auto-yes answers yes; a non-interactive context answers `default`.
pub async fn confirm(ctx: &UiContext, prompt: &str, default: bool) -> SandkitResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", prompt);
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on the terminal
    let prompt = prompt.to_string();
    let answer = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&prompt).initial_value(default).interact()
    })
    .await
    .map_err(|e| SandkitError::User(format!("Prompt task failed: {}", e)))?;

    answer.map_err(|e| SandkitError::User(format!("Prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_auto_yes() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Clear?", false).await.unwrap());
    }

    #[tokio::test]
    async fn confirm_non_interactive_default() {
        let ctx = UiContext::non_interactive();
        assert!(confirm(&ctx, "Clear?", true).await.unwrap());
        assert!(!confirm(&ctx, "Clear?", false).await.unwrap());
    }
}
