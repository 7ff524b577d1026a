//! Pseudo-terminal relay for interactive sandboxed commands.
//!
//! [`PtyBridge`] connects the caller's standard streams to a fresh
//! pseudo-terminal whose slave end becomes the child's terminal.
//! [`SignalRelay`] turns terminal-related signals into event-loop readiness
//! so they can be handed to [`PtyBridge::inject_signal`].
//!
//! Both types are driven by a caller-owned [`mio::Poll`]:
//!
//! ```no_run
//! # use std::io;
//! # use std::os::fd::AsFd;
//! # use mio::{Events, Poll, Token};
//! # use vessel_pty::{BridgeTokens, PtyBridge, SignalRelay};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut poll = Poll::new()?;
//! let tokens = BridgeTokens { input: Token(0), output: Token(1), pty: Token(2) };
//! let mut bridge = PtyBridge::new(io::stdin().as_fd(), io::stdout().as_fd(), poll.registry(), tokens)?;
//! let mut signals = SignalRelay::new(poll.registry(), Token(3))?;
//! let mut events = Events::with_capacity(16);
//! while bridge.is_active() {
//!     poll.poll(&mut events, None)?;
//!     for event in &events {
//!         if signals.owns(event.token()) {
//!             if let Some(signal) = signals.drain(event.token()) {
//!                 bridge.inject_signal(signal)?;
//!             }
//!         } else {
//!             bridge.handle_event(event)?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod bridge;
mod buffer;
mod error;
mod signals;
mod terminal;

pub use bridge::{BridgeState, BridgeTokens, PtyBridge};
pub use buffer::{BUFFER_SIZE, OOB_BUFFER_SIZE};
pub use error::PtyError;
pub use signals::{FORWARDED_SIGNALS, SignalRelay};
