//! # Console
//!
//! Operator-facing output and the destroy confirmation prompt.
//!
//! Progress messages go to stdout so they stay readable when logs (stderr)
//! are redirected or emitted as JSON.

use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

const BANNER_TOP: &str = "###################=============================------------";
const BANNER_BOTTOM: &str = "------------=============================###################";

/// The only answer that confirms a destructive action
const CONFIRMATION: &str = "yes";

#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Ask for confirmation; resolves to `false` on timeout or any answer but `yes`
    async fn prompt_yes_no(&self, timeout: Duration) -> bool;

    fn write_line(&self, message: &str);

    /// Print a message framed so it stands out from surrounding output
    fn flash_banner(&self, message: &str);
}

/// Whether an answer read from the operator confirms the action
#[must_use]
pub fn is_confirmation(answer: &str) -> bool {
    answer.trim_end_matches(['\r', '\n']) == CONFIRMATION
}

/// Frame `message` between banner rules
#[must_use]
pub fn banner(message: &str) -> String {
    format!("\n{BANNER_TOP}\n{message}\n{BANNER_BOTTOM}\n")
}

/// Stdin/stdout interaction
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleJockey;

#[async_trait]
impl UserInteraction for ConsoleJockey {
    async fn prompt_yes_no(&self, timeout: Duration) -> bool {
        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());

        match tokio::time::timeout(timeout, stdin.read_line(&mut answer)).await {
            Ok(Ok(_)) => is_confirmation(&answer),
            Ok(Err(e)) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
            Err(_) => {
                debug!("No confirmation within {:?}", timeout);
                false
            }
        }
    }

    fn write_line(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{message}").and_then(|()| stdout.flush()) {
            warn!("Failed to write to stdout: {}", e);
        }
    }

    fn flash_banner(&self, message: &str) {
        self.write_line(&banner(message));
    }
}
