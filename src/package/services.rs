//! Installed-state checks against the host service manager.

use duct::cmd;

/// Queries the host service manager.
pub trait ServiceStatus: Send + Sync {
    fn is_registered(&self, name: &str) -> bool;
    fn is_running(&self, name: &str) -> bool;
}

/// systemd on Linux, the service control manager on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemServices;

impl ServiceStatus for SystemServices {
    fn is_registered(&self, name: &str) -> bool {
        if cfg!(windows) {
            cmd("sc", ["query", name])
                .stdout_null()
                .stderr_null()
                .unchecked()
                .run()
                .map(|out| out.status.success())
                .unwrap_or(false)
        } else {
            cmd("systemctl", ["cat", "--", name])
                .stdout_null()
                .stderr_null()
                .unchecked()
                .run()
                .map(|out| out.status.success())
                .unwrap_or(false)
        }
    }

    fn is_running(&self, name: &str) -> bool {
        if cfg!(windows) {
            cmd("sc", ["query", name])
                .stderr_null()
                .unchecked()
                .read()
                .map(|out| sc_state_is_running(&out))
                .unwrap_or(false)
        } else {
            cmd("systemctl", ["is-active", "--quiet", name])
                .stdout_null()
                .stderr_null()
                .unchecked()
                .run()
                .map(|out| out.status.success())
                .unwrap_or(false)
        }
    }
}

/// Parse the `STATE` line of `sc query` output.
fn sc_state_is_running(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("STATE"))
        .any(|rest| rest.split_whitespace().any(|word| word == "RUNNING"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc_state_parsing() {
        let running = "SERVICE_NAME: nginx\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : 4  RUNNING\n";
        let stopped = "SERVICE_NAME: nginx\n        STATE              : 1  STOPPED\n";
        assert!(sc_state_is_running(running));
        assert!(!sc_state_is_running(stopped));
        assert!(!sc_state_is_running(""));
    }
}
