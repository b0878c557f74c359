//! Load the location advertisement into the LE adapter.

use anyhow::{bail, Context};
use lbeacon_core::advertisement::{self, HostCommand};
use lbeacon_core::BeaconConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Run the advertisement commands in order.
///
/// Failures are logged and stop the remaining commands, but never the
/// beacon. Returns how many commands succeeded.
pub async fn advertise(config: &BeaconConfig) -> usize {
    let commands = advertisement::commands(&config.advertisement, &config.location);
    if commands.is_empty() {
        debug!("Location advertisement disabled");
        return 0;
    }

    let total = commands.len();
    let mut succeeded = 0;
    for command in commands {
        if let Err(e) = run(&command).await {
            warn!(command = %command, error = %format!("{e:#}"), "Advertisement command failed");
            break;
        }
        succeeded += 1;
    }

    if succeeded == total {
        info!(
            adapter = %config.advertisement.adapter,
            x = config.location.x,
            y = config.location.y,
            "Advertising location"
        );
    }
    succeeded
}

async fn run(command: &HostCommand) -> anyhow::Result<()> {
    debug!(command = %command, "Running");
    let output = Command::new(command.program)
        .args(&command.args)
        .output()
        .await
        .with_context(|| format!("failed to start {}", command.program))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            command.program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_advertisement_runs_nothing() {
        let mut config = BeaconConfig::default();
        config.advertisement.enabled = false;
        assert_eq!(advertise(&config).await, 0);
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_fatal() {
        let command = HostCommand {
            program: "lbeacon-no-such-tool",
            args: vec!["hci0".into()],
        };
        let err = run(&command).await.unwrap_err();
        assert!(format!("{err:#}").starts_with("failed to start lbeacon-no-such-tool"));
    }
}
