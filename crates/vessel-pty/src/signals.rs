//! Delivers forwarded signals through the event loop.
//!
//! Each signal gets its own socket pair: the handler writes a byte to one
//! end and the other end is registered with [`mio`] under its own token, so
//! a readable event identifies the signal without further bookkeeping.

use std::io::{self, Read};
use std::os::unix::net::UnixStream as StdUnixStream;

use mio::net::UnixStream;
use mio::{Interest, Registry, Token};
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTSTP, SIGWINCH};
use tracing::debug;

use crate::error::PtyError;

const SIGNAL_TARGET: &str = "vessel_pty::signals";

/// Signals relayed to an interactive child.
pub const FORWARDED_SIGNALS: [i32; 4] = [SIGWINCH, SIGINT, SIGQUIT, SIGTSTP];

#[derive(Debug)]
struct Slot {
    signal: i32,
    token: Token,
    receiver: UnixStream,
    id: SigId,
}

/// Installs handlers for [`FORWARDED_SIGNALS`] and reports their delivery as
/// readiness events.
///
/// Installing the relay replaces the default actions of these signals, so
/// the process itself is neither interrupted nor stopped by them. Dropping it
/// stops the notifications but does not bring the default actions back.
#[derive(Debug)]
pub struct SignalRelay {
    slots: Vec<Slot>,
}

impl SignalRelay {
    /// Installs the handlers, registering one source per signal under
    /// consecutive tokens starting at `first_token`.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Signal`] when a handler cannot be installed and
    /// [`PtyError::Register`] when a source cannot be registered.
    pub fn new(registry: &Registry, first_token: Token) -> Result<Self, PtyError> {
        let mut relay = Self {
            slots: Vec::with_capacity(FORWARDED_SIGNALS.len()),
        };
        for (offset, signal) in FORWARDED_SIGNALS.into_iter().enumerate() {
            let token = Token(first_token.0 + offset);
            let slot = Self::install(registry, signal, token)?;
            relay.slots.push(slot);
        }
        debug!(target: SIGNAL_TARGET, signals = ?FORWARDED_SIGNALS, "signal relay installed");
        Ok(relay)
    }

    fn install(registry: &Registry, signal: i32, token: Token) -> Result<Slot, PtyError> {
        let failed = move |source: io::Error| PtyError::Signal {
            signal,
            source: source.into(),
        };
        let (receiver, sender) = StdUnixStream::pair().map_err(failed)?;
        receiver.set_nonblocking(true).map_err(failed)?;
        sender.set_nonblocking(true).map_err(failed)?;
        let id = signal_hook::low_level::pipe::register(signal, sender).map_err(failed)?;
        let mut receiver = UnixStream::from_std(receiver);
        if let Err(error) = registry.register(&mut receiver, token, Interest::READABLE) {
            signal_hook::low_level::unregister(id);
            return Err(PtyError::register(error));
        }
        Ok(Slot {
            signal,
            token,
            receiver,
            id,
        })
    }

    /// Returns true when `token` belongs to this relay.
    #[must_use]
    pub fn owns(&self, token: Token) -> bool {
        self.slots.iter().any(|slot| slot.token == token)
    }

    /// Consumes the notifications pending under `token`.
    ///
    /// Returns the signal when at least one delivery was pending. Repeated
    /// deliveries before the drain are reported once.
    pub fn drain(&mut self, token: Token) -> Option<i32> {
        let slot = self.slots.iter_mut().find(|slot| slot.token == token)?;
        let mut delivered = false;
        let mut scratch = [0_u8; 16];
        loop {
            match slot.receiver.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => delivered = true,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    if error.kind() != io::ErrorKind::WouldBlock {
                        debug!(target: SIGNAL_TARGET, signal = slot.signal, %error, "signal pipe failed");
                    }
                    break;
                }
            }
        }
        delivered.then_some(slot.signal)
    }

    /// Removes the handlers and deregisters every source.
    pub fn close(mut self, registry: &Registry) {
        for slot in &mut self.slots {
            if let Err(error) = registry.deregister(&mut slot.receiver) {
                debug!(target: SIGNAL_TARGET, signal = slot.signal, %error, "deregister failed");
            }
        }
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            signal_hook::low_level::unregister(slot.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use mio::{Events, Poll};

    use super::*;

    #[test]
    fn delivers_each_signal_under_its_own_token() {
        let mut poll = Poll::new().expect("poll");
        let mut relay = SignalRelay::new(poll.registry(), Token(10)).expect("relay");
        assert!(relay.owns(Token(10)));
        assert!(relay.owns(Token(13)));
        assert!(!relay.owns(Token(14)));

        signal_hook::low_level::raise(SIGWINCH).expect("raise");

        let mut events = Events::with_capacity(8);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while seen.is_none() && Instant::now() < deadline {
            poll.poll(&mut events, Some(Duration::from_millis(50)))
                .expect("poll");
            for event in &events {
                if relay.owns(event.token()) {
                    seen = relay.drain(event.token()).or(seen);
                }
            }
        }

        assert_eq!(seen, Some(SIGWINCH));
        assert_eq!(relay.drain(Token(10)), None);
        relay.close(poll.registry());
    }
}
