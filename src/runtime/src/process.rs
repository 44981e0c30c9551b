//! Subprocess helpers.

use std::process::Output;

use tokio::process::Command;

/// Render a command line for logs, shell-quoted.
pub fn display_command(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    shell_words::join(
        std::iter::once(std_cmd.get_program())
            .chain(std_cmd.get_args())
            .map(|word| word.to_string_lossy()),
    )
}

/// Log the command line, then run it capturing stdout and stderr.
pub async fn run_logged(cmd: &mut Command) -> std::io::Result<Output> {
    tracing::info!("$ {}", display_command(cmd));
    cmd.output().await
}

/// Run without logging the command line (it may carry credentials).
pub async fn run_quiet(cmd: &mut Command) -> std::io::Result<Output> {
    cmd.output().await
}

/// Trimmed stderr, or the exit status when stderr is empty.
pub fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("exit status {}", output.status.code().unwrap_or(-1))
    } else {
        trimmed.to_string()
    }
}
