// ABOUTME: Standalone engine commands: rm, ls, status
// ABOUTME: Thin wrappers over EngineApi that print one line per result

use crate::console::Console;
use crate::error::CliError;
use crate::pipeline::cleanup::{classify_delete, with_progress, CleanupOutcome, PROGRESS_GRACE};
use crate::remote::EngineApi;

/// `sqlrs rm <instance-id>`. Unlike pipeline cleanup, a blocked delete is
/// an error here because the user asked for it explicitly.
pub async fn remove_instance(
    api: &dyn EngineApi,
    console: &Console,
    verbose: bool,
    instance_id: &str,
) -> Result<i32, CliError> {
    let label = format!("Deleting instance {}", instance_id);
    let reply = with_progress(console, verbose, &label, PROGRESS_GRACE, api.delete_instance(instance_id)).await;
    match classify_delete(reply) {
        CleanupOutcome::Deleted => {
            console.out_line(format_args!("Deleted instance {}", instance_id));
            Ok(0)
        }
        CleanupOutcome::Blocked {
            reason,
            connections,
        } => {
            let mut message = format!(
                "instance {} is in use: {}",
                instance_id,
                reason.as_deref().unwrap_or("blocked")
            );
            if let Some(n) = connections {
                message.push_str(&format!(" ({} active connection(s))", n));
            }
            Err(CliError::remote_status(409, message))
        }
        CleanupOutcome::Failed(message) => Err(CliError::remote(message)),
    }
}

/// `sqlrs ls`.
pub async fn list_instances(api: &dyn EngineApi, console: &Console) -> Result<i32, CliError> {
    for instance in api.list_instances().await? {
        console.out_line(format_args!(
            "{}\t{}\t{}\t{}\t{}",
            instance.instance_id,
            instance.image_id,
            instance.state_id,
            instance.status.as_deref().unwrap_or("-"),
            instance.created_at.as_deref().unwrap_or("-")
        ));
    }
    Ok(0)
}

/// `sqlrs status`.
pub async fn engine_status(api: &dyn EngineApi, console: &Console) -> Result<i32, CliError> {
    let health = api.health().await?;
    let version = health.version.as_deref().unwrap_or("unknown");
    if health.ok {
        console.out_line(format_args!("engine: ok (version {})", version));
        Ok(0)
    } else {
        console.out_line(format_args!("engine: not ready (version {})", version));
        Ok(1)
    }
}
