//! Unix signal handling for the geoalarm daemon.
//!
//! SIGINT, SIGTERM and SIGHUP request a graceful shutdown. SIGUSR1 asks the
//! daemon to log the state of every alarm. Signals are turned into messages on
//! the daemon's event channel so the main loop handles them in order with
//! everything else.

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1},
    iterator::Signals,
};
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    sync::mpsc::Sender,
    thread,
};

/// Messages produced by the signal thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMessage {
    /// SIGINT, SIGTERM or SIGHUP
    Shutdown { signal: i32 },
    /// SIGUSR1
    Status,
}

impl SignalMessage {
    /// Map a raw signal number to a message.
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGINT | SIGTERM | SIGHUP => Some(Self::Shutdown { signal }),
            SIGUSR1 => Some(Self::Status),
            _ => None,
        }
    }
}

/// Signal handling state shared between threads.
pub struct SignalState {
    /// Cleared once a shutdown signal arrives
    pub running: Arc<AtomicBool>,
}

/// Install handlers and start the signal thread.
///
/// Each signal is forwarded on `sender`; the thread exits after the first
/// shutdown signal or when the receiving side is gone.
pub fn setup_signal_handler<T>(sender: Sender<T>) -> Result<SignalState>
where
    T: From<SignalMessage> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR1])
        .context("failed to register signal handlers")?;

    let running_clone = running.clone();

    thread::spawn(move || {
        for sig in signals.forever() {
            let Some(message) = SignalMessage::from_signal(sig) else {
                continue;
            };

            match message {
                SignalMessage::Status => {
                    log_pipe!();
                    log_info!("Received status request");
                }
                SignalMessage::Shutdown { signal } => {
                    log_pipe!();
                    match signal {
                        SIGINT => {
                            log_info!("Received interrupt signal, initiating graceful shutdown...")
                        }
                        SIGHUP => log_info!("Terminal disconnected, initiating graceful shutdown..."),
                        _ => log_info!("Received termination request, initiating graceful shutdown..."),
                    }
                    running_clone.store(false, Ordering::SeqCst);
                }
            }

            let is_shutdown = matches!(message, SignalMessage::Shutdown { .. });
            if let Err(e) = sender.send(T::from(message)) {
                log_debug!("Signal channel closed: {e}");
                break;
            }
            if is_shutdown {
                break;
            }
        }
    });

    Ok(SignalState { running })
}
