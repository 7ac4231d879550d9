// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

#[cfg(target_os = "linux")]
pub mod capture;
pub mod config;
pub mod correlate;
pub mod display;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// SIGINT and SIGTERM, caught from the moment this is registered.
///
/// Must be created inside a runtime context. Once it exists neither signal
/// kills the process; they are only reported through [`Shutdown::wait`].
pub(crate) struct Shutdown {
    #[cfg(unix)]
    signals: [tokio::signal::unix::Signal; 2],
}

impl Shutdown {
    pub(crate) fn register() -> std::io::Result<Shutdown> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            Ok(Shutdown {
                signals: [
                    signal(SignalKind::interrupt())?,
                    signal(SignalKind::terminate())?,
                ],
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Shutdown {})
        }
    }

    /// Resolves on the next signal, including one that arrived before this
    /// was first polled.
    pub(crate) async fn wait(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let [int, term] = &mut self.signals;
            tokio::select! {
                _ = int.recv() => {}
                _ = term.recv() => {}
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    }
}
