//! Interactive confirmation before destructive work.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use async_trait::async_trait;
use offboard_config::RunMode;
use offboard_engine::{AutoConfirm, Confirmation, ConfirmationRequest, NeverConfirm};
use tracing::warn;

use crate::client::{CliError, CliResult};

/// Asks on the terminal; only an explicit `yes` proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TerminalConfirmation;

#[async_trait]
impl Confirmation for TerminalConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let question = prompt_text(request);
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr().lock();
            write!(stderr, "{question}")?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_affirmative(&line),
            Ok(Err(err)) => {
                warn!(error = %err, "failed to read confirmation; declining");
                false
            }
            Err(err) => {
                warn!(error = %err, "confirmation prompt aborted; declining");
                false
            }
        }
    }
}

/// Pick the checkpoint implementation for a run.
///
/// Revoking without `--yes` needs a terminal to ask on.
pub(crate) fn confirmation_for(mode: RunMode, assume_yes: bool) -> CliResult<Arc<dyn Confirmation>> {
    if !mode.is_destructive() {
        return Ok(Arc::new(NeverConfirm));
    }
    if assume_yes {
        return Ok(Arc::new(AutoConfirm));
    }
    if io::stdin().is_terminal() {
        Ok(Arc::new(TerminalConfirmation))
    } else {
        Err(CliError::validation(
            "revoke mode needs confirmation: pass --yes or run from an interactive terminal",
        ))
    }
}

fn prompt_text(request: &ConfirmationRequest) -> String {
    format!(
        "About to revoke {} grant(s) held by {} ({} ownership grant(s) protected, {} already removed; \
         inventory {}s old).\nType 'yes' to continue: ",
        request.revocable,
        request.principal,
        request.protected,
        request.absent,
        request.snapshot_age_secs
    )
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}
