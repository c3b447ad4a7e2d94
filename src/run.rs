// ABOUTME: Run step: executes psql or pgbench against a provisioned instance
// ABOUTME: Relays streamed output to the console and returns the tool's exit code

use futures::StreamExt;
use tracing::debug;

use crate::console::Console;
use crate::error::CliError;
use crate::remote::models::{RunEvent, RunRequest};
use crate::remote::EngineApi;

/// Starts the run and relays its output until the `exit` event.
pub async fn execute_run(
    api: &dyn EngineApi,
    console: &Console,
    request: &RunRequest,
) -> Result<i32, CliError> {
    debug!(
        "Running {} on instance {} with {} argument(s)",
        request.kind,
        request.instance_ref,
        request.args.len()
    );
    let mut events = api.start_run(request).await?;

    while let Some(event) = events.next().await {
        match event? {
            RunEvent::Stdout { data } => console.out_raw(&data),
            RunEvent::Stderr { data } => console.err_raw(&data),
            RunEvent::Exit { exit_code } => {
                debug!("{} exited with {}", request.kind, exit_code);
                return Ok(exit_code);
            }
            RunEvent::Error { message } => {
                return Err(CliError::remote(format!("{} run failed: {}", request.kind, message)))
            }
            RunEvent::Other => {}
        }
    }

    Err(CliError::remote(format!(
        "{} run ended without an exit status",
        request.kind
    )))
}
