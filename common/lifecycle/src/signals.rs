use std::fmt;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Termination signals the runner reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Hangup,
    Interrupt,
    Quit,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Hangup => "SIGHUP",
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Terminate => "SIGTERM",
        };
        f.write_str(name)
    }
}

pub(crate) struct SignalListener {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    pub(crate) fn install() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Forwards received signals until the runner goes away.
    pub(crate) async fn forward(mut self, tx: mpsc::Sender<Signal>) {
        loop {
            let received = tokio::select! {
                Some(()) = self.hangup.recv() => Signal::Hangup,
                Some(()) = self.interrupt.recv() => Signal::Interrupt,
                Some(()) = self.quit.recv() => Signal::Quit,
                Some(()) = self.terminate.recv() => Signal::Terminate,
                else => return,
            };
            info!(signal = %received, "Lifecycle: received signal");
            if !deliver(&tx, received) {
                return;
            }
        }
    }
}

/// Non-blocking send; a full channel already holds a pending trigger. Returns false once
/// the receiving side is gone.
pub(crate) fn deliver(tx: &mpsc::Sender<Signal>, signal: Signal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(signal = %signal, "Lifecycle: signal dropped, shutdown already pending");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
