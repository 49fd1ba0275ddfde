//! Interrupt handling.
//!
//! The pipeline records what it has started in a [`ProvisionGuard`]; the
//! interrupt path only reads it to tell the operator how to clean up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::signal;
use tracing::{info, warn};

use crate::ui;

/// Handoff cell between the pipeline and the interrupt path.
#[derive(Debug, Default)]
pub struct ProvisionGuard {
    /// Manual teardown command, set once before terraform runs.
    teardown: OnceLock<String>,
    /// Set just before `terraform apply` starts creating resources.
    creating: AtomicBool,
}

impl ProvisionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the command that tears down the terraform state. First call wins.
    pub fn record_teardown(&self, command: impl Into<String>) {
        let _ = self.teardown.set(command.into());
    }

    /// Mark that remote resources may now exist.
    pub fn mark_creating(&self) {
        self.creating.store(true, Ordering::Release);
    }

    /// Whether cluster creation has begun.
    #[must_use]
    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::Acquire)
    }

    /// Teardown command, if remote resources may exist.
    #[must_use]
    pub fn teardown_hint(&self) -> Option<String> {
        if self.is_creating() {
            self.teardown.get().cloned()
        } else {
            None
        }
    }
}

/// Print the interrupt warning for the current guard state.
pub fn report_interrupt(guard: &ProvisionGuard) {
    println!();
    ui::print_warning("Interrupt received");
    ui::print_info("terraform may still be running in the background");

    if let Some(command) = guard.teardown_hint() {
        warn!(teardown = %command, "Interrupted after cluster creation started");
        ui::print_warning("Cluster resources were created");
        ui::print_info("To clean up run:");
        ui::print_info(&format!("  {command}"));
    }

    ui::print_info("Exiting...");
}

/// Resolve when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C");
        },
        () = terminate => {
            info!("Received SIGTERM");
        },
    }
}
