// Signal handling for graceful service shutdown

use crate::error::{PiiFilterError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// Signals the service reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSignal {
    Terminate,
    Interrupt,
    Hangup,
    /// SIGUSR1: log a health snapshot
    Status,
}

impl ServiceSignal {
    /// Check if the signal should trigger shutdown
    pub fn should_shutdown(&self) -> bool {
        matches!(
            self,
            ServiceSignal::Terminate | ServiceSignal::Interrupt | ServiceSignal::Hangup
        )
    }
}

/// Signal handler that manages multiple Unix signals
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
    sigusr1: TokioSignal,
}

impl SignalHandler {
    /// Sets up handlers for SIGTERM, SIGINT, SIGHUP, and SIGUSR1
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigusr1: install(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    /// Wait for any signal to be received
    pub async fn wait(&mut self) -> ServiceSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                ServiceSignal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                ServiceSignal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                ServiceSignal::Hangup
            }
            _ = self.sigusr1.recv() => {
                tracing::debug!("Received SIGUSR1");
                ServiceSignal::Status
            }
        }
    }
}

fn install(kind: SignalKind, name: &str) -> Result<TokioSignal> {
    signal(kind).map_err(|e| PiiFilterError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signals() {
        assert!(ServiceSignal::Terminate.should_shutdown());
        assert!(ServiceSignal::Interrupt.should_shutdown());
        assert!(ServiceSignal::Hangup.should_shutdown());
        assert!(!ServiceSignal::Status.should_shutdown());
    }
}
