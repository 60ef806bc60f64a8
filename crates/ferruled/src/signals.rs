//! SIGINT/SIGTERM handling (`spec.md` §7: "A second SIGINT/SIGTERM during
//! grace forces an immediate shutdown with a distinct exit code").

use tokio::signal::unix::{signal, SignalKind};

/// Waits for the first SIGINT or SIGTERM, then returns a receiver that
/// resolves if a *second* one arrives — callers race it against their
/// grace-period wait to implement the forced-immediate-shutdown behavior.
pub async fn wait_for_first_signal() -> std::io::Result<SecondSignal> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }

    Ok(SecondSignal { sigint, sigterm })
}

pub struct SecondSignal {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

impl SecondSignal {
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => {}
            _ = self.sigterm.recv() => {}
        }
    }
}
