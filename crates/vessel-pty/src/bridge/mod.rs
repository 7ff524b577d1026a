//! Full-duplex relay between two descriptors and a new pseudo-terminal.
//!
//! The bridge owns no thread. It registers its descriptors with a caller's
//! [`mio::Poll`] and does its work from [`PtyBridge::handle_event`]. Four
//! flows are tracked:
//!
//! - input readable: read into the input buffer, then try writing to the pty;
//! - pty writable: write out-of-band bytes first, then buffered input;
//! - pty readable: read into the output buffer, then try writing it out;
//! - output writable: write the output buffer.
//!
//! Registrations are recomputed after every event: a read stays disarmed
//! while its buffer is full and is re-armed as soon as the buffer drains.
//!
//! Regular files and `/dev/null` cannot be registered with epoll. Such a side
//! is treated as permanently ready and serviced directly whenever its
//! interest is armed.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use rustix::fs::OFlags;
use rustix::io::Errno;
use rustix::pty::OpenptFlags;
use rustix::termios::Termios;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTSTP, SIGWINCH};
use tracing::{debug, warn};

use crate::buffer::{BUFFER_SIZE, OOB_BUFFER_SIZE, RelayBuffer, Transfer, drain_prioritised};
use crate::error::PtyError;
use crate::terminal::{self, Keep};


const BRIDGE_TARGET: &str = "vessel_pty::bridge";

/// Tokens under which the bridge registers its descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTokens {
    /// Token for the input source.
    pub input: Token,
    /// Token for the output destination.
    pub output: Token,
    /// Token for the pseudo-terminal master.
    pub pty: Token,
}

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// The pty is open and data may still flow in either direction.
    Active,
    /// The pty is gone but buffered output is still being written.
    Closing,
    /// Nothing is left to do.
    Closed,
}

/// Tracks one registered descriptor's current interest.
#[derive(Debug)]
struct Registration {
    token: Token,
    interest: Option<Interest>,
    /// The descriptor cannot be polled and is never handed to the registry.
    always_ready: bool,
}

impl Registration {
    const fn new(token: Token) -> Self {
        Self {
            token,
            interest: None,
            always_ready: false,
        }
    }

    /// Returns true when the interest is armed but no event will ever report
    /// it, so the owner has to act on it directly.
    const fn needs_service(&self) -> bool {
        self.always_ready && self.interest.is_some()
    }

    fn update(
        &mut self,
        registry: &Registry,
        fd: BorrowedFd<'_>,
        desired: Option<Interest>,
    ) -> io::Result<()> {
        if self.always_ready {
            self.interest = desired;
            return Ok(());
        }
        let raw = fd.as_raw_fd();
        let mut source = SourceFd(&raw);
        match (self.interest, desired) {
            (None, Some(interest)) => match registry.register(&mut source, self.token, interest) {
                Ok(()) => {}
                Err(error) if error.raw_os_error() == Some(Errno::PERM.raw_os_error()) => {
                    debug!(
                        target: BRIDGE_TARGET,
                        token = self.token.0,
                        "descriptor cannot be polled, treating it as always ready"
                    );
                    self.always_ready = true;
                }
                Err(error) => return Err(error),
            },
            (Some(current), Some(interest)) if current != interest => {
                registry.reregister(&mut source, self.token, interest)?;
            }
            (Some(_), None) => registry.deregister(&mut source)?,
            _ => return Ok(()),
        }
        self.interest = desired;
        Ok(())
    }

    fn release(&mut self, registry: &Registry, fd: BorrowedFd<'_>) {
        if self.interest.take().is_some() && !self.always_ready {
            let raw = fd.as_raw_fd();
            if let Err(error) = registry.deregister(&mut SourceFd(&raw)) {
                debug!(target: BRIDGE_TARGET, %error, "deregister failed");
            }
        }
    }
}

/// One of the two outer endpoints.
#[derive(Debug)]
struct Side {
    name: &'static str,
    fd: Option<OwnedFd>,
    registration: Registration,
    buffer: RelayBuffer,
    /// Refers to the same open file as the other side.
    is_shared: bool,
    was_blocking: bool,
    hung_up: bool,
    saved: Option<Termios>,
}

impl Side {
    fn open(name: &'static str, fd: BorrowedFd<'_>, token: Token) -> Result<Self, PtyError> {
        let fd = rustix::io::fcntl_dupfd_cloexec(fd, 3)
            .map_err(|errno| PtyError::setup("fcntl(F_DUPFD_CLOEXEC)", errno))?;
        let flags = rustix::fs::fcntl_getfl(&fd).map_err(|errno| PtyError::setup("fcntl(F_GETFL)", errno))?;
        let was_blocking = !flags.contains(OFlags::NONBLOCK);
        if was_blocking {
            rustix::fs::fcntl_setfl(&fd, flags | OFlags::NONBLOCK)
                .map_err(|errno| PtyError::setup("fcntl(F_SETFL)", errno))?;
        }
        Ok(Self {
            name,
            fd: Some(fd),
            registration: Registration::new(token),
            buffer: RelayBuffer::new(BUFFER_SIZE),
            is_shared: false,
            was_blocking,
            hung_up: false,
            saved: None,
        })
    }

    const fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Restores attributes and blocking mode, then closes the descriptor.
    fn close(&mut self, registry: Option<&Registry>) {
        let Some(fd) = self.fd.take() else {
            return;
        };
        if let Some(registry) = registry {
            self.registration.release(registry, fd.as_fd());
        }
        if let Some(saved) = self.saved.take()
            && let Err(errno) = terminal::restore(fd.as_fd(), &saved)
        {
            warn!(target: BRIDGE_TARGET, side = self.name, %errno, "restoring terminal attributes failed");
        }
        if self.was_blocking
            && let Ok(flags) = rustix::fs::fcntl_getfl(&fd)
            && let Err(errno) = rustix::fs::fcntl_setfl(&fd, flags - OFlags::NONBLOCK)
        {
            warn!(target: BRIDGE_TARGET, side = self.name, %errno, "restoring blocking mode failed");
        }
        debug!(target: BRIDGE_TARGET, side = self.name, hung_up = self.hung_up, "side closed");
    }
}

impl Drop for Side {
    fn drop(&mut self) {
        self.close(None);
    }
}

/// The pseudo-terminal pair.
#[derive(Debug)]
struct Pty {
    master: Option<OwnedFd>,
    slave: Option<OwnedFd>,
    registration: Registration,
}

impl Pty {
    fn open(token: Token) -> Result<Self, PtyError> {
        let flags = OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC;
        let master = rustix::pty::openpt(flags).map_err(|errno| PtyError::setup("posix_openpt", errno))?;
        rustix::pty::grantpt(&master).map_err(|errno| PtyError::setup("grantpt", errno))?;
        rustix::pty::unlockpt(&master).map_err(|errno| PtyError::setup("unlockpt", errno))?;
        let slave = match rustix::pty::ioctl_tiocgptpeer(&master, flags) {
            Ok(slave) => slave,
            Err(errno) => {
                debug!(target: BRIDGE_TARGET, %errno, "TIOCGPTPEER unavailable, opening slave by name");
                let name = rustix::pty::ptsname(&master, Vec::new())
                    .map_err(|errno| PtyError::setup("ptsname", errno))?;
                rustix::fs::open(
                    name.as_c_str(),
                    OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC,
                    rustix::fs::Mode::empty(),
                )
                .map_err(|errno| PtyError::setup("open(pty slave)", errno))?
            }
        };
        let current = rustix::fs::fcntl_getfl(&master).map_err(|errno| PtyError::setup("fcntl(F_GETFL)", errno))?;
        rustix::fs::fcntl_setfl(&master, current | OFlags::NONBLOCK)
            .map_err(|errno| PtyError::setup("fcntl(F_SETFL)", errno))?;
        Ok(Self {
            master: Some(master),
            slave: Some(slave),
            registration: Registration::new(token),
        })
    }

    const fn is_open(&self) -> bool {
        self.master.is_some()
    }
}

/// Lazily opened controlling terminal.
#[derive(Debug)]
enum ControllingTerminal {
    Unopened,
    Unavailable,
    Open(OwnedFd),
}

/// Relays bytes between an input source, an output destination and a new
/// pseudo-terminal, translating forwarded signals into terminal input.
#[derive(Debug)]
pub struct PtyBridge {
    registry: Registry,
    pty: Pty,
    oob: RelayBuffer,
    input: Side,
    output: Side,
    tty: ControllingTerminal,
}

impl PtyBridge {
    /// Creates a pseudo-terminal and starts relaying between it and the given
    /// descriptors.
    ///
    /// Both descriptors are duplicated and switched to non-blocking mode.
    /// Terminals among them are put in raw mode. Everything is restored when
    /// the bridge is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Setup`] naming the failing call when the pty or
    /// the duplicates cannot be set up, and [`PtyError::Register`] when the
    /// descriptors cannot be polled.
    pub fn new(
        input: BorrowedFd<'_>,
        output: BorrowedFd<'_>,
        registry: &Registry,
        tokens: BridgeTokens,
    ) -> Result<Self, PtyError> {
        let pty = Pty::open(tokens.pty)?;
        let mut input_side = Side::open("input", input, tokens.input)?;
        let mut output_side = Side::open("output", output, tokens.output)?;
        let shared = terminal::same_file(input, output);
        input_side.is_shared = shared;
        output_side.is_shared = shared;

        if let Some(fd) = input_side.fd.as_ref() {
            input_side.saved = terminal::make_raw(fd.as_fd(), Keep::OutputModes)?;
        }
        if !shared && let Some(fd) = output_side.fd.as_ref() {
            output_side.saved = terminal::make_raw(fd.as_fd(), Keep::InputModes)?;
        }

        let registry = registry.try_clone().map_err(PtyError::register)?;
        let mut bridge = Self {
            registry,
            pty,
            oob: RelayBuffer::new(OOB_BUFFER_SIZE),
            input: input_side,
            output: output_side,
            tty: ControllingTerminal::Unopened,
        };
        bridge.propagate_window_size();
        bridge.settle()?;
        debug!(target: BRIDGE_TARGET, shared, "bridge active");
        Ok(bridge)
    }

    /// The slave end, to be used as the child's standard streams.
    #[must_use]
    pub fn pty_slave(&self) -> Option<BorrowedFd<'_>> {
        self.pty.slave.as_ref().map(AsFd::as_fd)
    }

    /// Closes the bridge's copy of the slave.
    ///
    /// Call this once the child holds its own copies, so the master reports
    /// hang-up when the last of them is closed.
    pub fn close_slave(&mut self) {
        self.pty.slave = None;
    }

    /// Dispatches one readiness event.
    ///
    /// Events for tokens the bridge does not own are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Register`] when registrations cannot be updated.
    pub fn handle_event(&mut self, event: &Event) -> Result<(), PtyError> {
        let token = event.token();
        if token == self.input.registration.token {
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.read_input();
            }
        } else if token == self.output.registration.token {
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                if event.is_write_closed() || event.is_error() {
                    self.output.hung_up = true;
                }
                self.write_output();
            }
        } else if token == self.pty.registration.token {
            if event.is_writable() {
                self.write_pty();
            }
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.read_pty();
            }
        } else {
            return Ok(());
        }
        self.settle()
    }

    /// Handles a forwarded signal.
    ///
    /// `SIGWINCH` copies the controlling terminal's size onto the pty.
    /// `SIGINT`, `SIGQUIT` and `SIGTSTP` become the matching control byte,
    /// written to the pty ahead of any buffered input. Other signals are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::Register`] when registrations cannot be updated.
    pub fn inject_signal(&mut self, signal: i32) -> Result<(), PtyError> {
        match signal {
            SIGWINCH => self.propagate_window_size(),
            SIGINT | SIGQUIT | SIGTSTP => {
                let Some(byte) = self.control_byte(signal) else {
                    debug!(target: BRIDGE_TARGET, signal, "control character disabled");
                    return Ok(());
                };
                if self.oob.push(&[byte]) == 0 {
                    warn!(target: BRIDGE_TARGET, signal, "out-of-band buffer full, dropping");
                    return Ok(());
                }
                debug!(target: BRIDGE_TARGET, signal, byte, "injecting control character");
                self.write_pty();
            }
            _ => {
                debug!(target: BRIDGE_TARGET, signal, "signal not forwarded");
                return Ok(());
            }
        }
        self.settle()
    }

    /// Returns true while the bridge may still move data.
    #[must_use]
    pub fn is_active(&self) -> bool {
        if self.pty.is_open() {
            !self.oob.is_empty()
                || !self.input.buffer.is_empty()
                || self.input.is_open()
                || self.output.is_open()
        } else {
            !self.output.buffer.is_empty() && self.output.is_open()
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        if !self.is_active() {
            BridgeState::Closed
        } else if self.pty.is_open() {
            BridgeState::Active
        } else {
            BridgeState::Closing
        }
    }

    fn open_controlling_terminal(&mut self) {
        if matches!(self.tty, ControllingTerminal::Unopened) {
            self.tty = match terminal::open_controlling_terminal() {
                Ok(fd) => ControllingTerminal::Open(fd),
                Err(errno) => {
                    debug!(target: BRIDGE_TARGET, %errno, "no controlling terminal");
                    ControllingTerminal::Unavailable
                }
            };
        }
    }

    fn controlling_terminal(&self) -> Option<BorrowedFd<'_>> {
        match &self.tty {
            ControllingTerminal::Open(fd) => Some(fd.as_fd()),
            ControllingTerminal::Unopened | ControllingTerminal::Unavailable => None,
        }
    }

    fn control_byte(&mut self, signal: i32) -> Option<u8> {
        self.open_controlling_terminal();
        let attributes = self
            .controlling_terminal()
            .and_then(|tty| rustix::termios::tcgetattr(tty).ok())
            .or_else(|| self.input.saved.clone());
        terminal::control_byte(signal, attributes.as_ref())
    }

    fn propagate_window_size(&mut self) {
        self.open_controlling_terminal();
        let Some(master) = self.pty.master.as_ref() else {
            return;
        };
        let source = self.controlling_terminal().or_else(|| {
            self.output
                .fd
                .as_ref()
                .filter(|fd| rustix::termios::isatty(fd))
                .map(AsFd::as_fd)
        });
        let Some(source) = source else {
            return;
        };
        if let Err(errno) = terminal::copy_window_size(source, master.as_fd()) {
            debug!(target: BRIDGE_TARGET, %errno, "window size not propagated");
        }
    }

    fn read_input(&mut self) {
        while self.pty.is_open() {
            let Some(fd) = self.input.fd.as_ref() else {
                return;
            };
            let outcome = self
                .input
                .buffer
                .fill(|spare| rustix::io::read(fd, spare).map_err(io::Error::from));
            match outcome {
                Transfer::Moved(_) => self.write_pty(),
                Transfer::Idle | Transfer::WouldBlock => return,
                Transfer::Closed => {
                    debug!(target: BRIDGE_TARGET, "input reached end of file");
                    self.close_input();
                    return;
                }
                Transfer::Failed(error) => {
                    warn!(target: BRIDGE_TARGET, %error, "reading input failed");
                    self.close_input();
                    return;
                }
            }
        }
    }

    fn write_pty(&mut self) {
        let Some(master) = self.pty.master.as_ref() else {
            return;
        };
        let outcome = drain_prioritised(&mut self.oob, &mut self.input.buffer, |bytes| {
            rustix::io::write(master, bytes).map_err(io::Error::from)
        });
        if let Transfer::Failed(error) = outcome {
            warn!(target: BRIDGE_TARGET, %error, "writing to pty failed");
            self.close_pty();
        }
    }

    fn read_pty(&mut self) {
        loop {
            let Some(master) = self.pty.master.as_ref() else {
                return;
            };
            let outcome = self
                .output
                .buffer
                .fill(|spare| rustix::io::read(master, spare).map_err(io::Error::from));
            match outcome {
                Transfer::Moved(_) => {
                    if self.output.is_open() {
                        self.write_output();
                    } else {
                        self.output.buffer.clear();
                    }
                }
                // The pty may still accept input after a zero-length read.
                Transfer::Idle | Transfer::WouldBlock | Transfer::Closed => return,
                Transfer::Failed(error) => {
                    if error.raw_os_error() == Some(Errno::IO.raw_os_error()) {
                        debug!(target: BRIDGE_TARGET, "pty hung up");
                    } else {
                        warn!(target: BRIDGE_TARGET, %error, "reading from pty failed");
                    }
                    self.close_pty();
                    return;
                }
            }
        }
    }

    fn write_output(&mut self) {
        let Some(fd) = self.output.fd.as_ref() else {
            self.output.buffer.clear();
            return;
        };
        let outcome = self
            .output
            .buffer
            .drain(|bytes| rustix::io::write(fd, bytes).map_err(io::Error::from));
        match outcome {
            Transfer::Failed(error) => {
                debug!(
                    target: BRIDGE_TARGET,
                    %error,
                    discarded = self.output.buffer.len(),
                    "output hung up, discarding buffered bytes"
                );
                self.output.hung_up = true;
                self.output.buffer.clear();
                self.close_output();
            }
            Transfer::WouldBlock if self.output.hung_up => {
                self.output.buffer.clear();
                self.close_output();
            }
            _ => {}
        }
    }

    fn close_input(&mut self) {
        self.input.close(Some(&self.registry));
    }

    fn close_output(&mut self) {
        self.output.close(Some(&self.registry));
    }

    /// Tears down both pty directions. Buffered output is kept.
    fn close_pty(&mut self) {
        if let Some(master) = self.pty.master.take() {
            self.pty.registration.release(&self.registry, master.as_fd());
            debug!(
                target: BRIDGE_TARGET,
                pending_output = self.output.buffer.len(),
                "pty closed"
            );
        }
    }

    /// Updates registrations, then services sides that cannot be polled.
    ///
    /// Reading an always-ready input stops once its buffer is full or the pty
    /// stops accepting bytes, so this does not spin; the next pty event picks
    /// up from there.
    fn settle(&mut self) -> Result<(), PtyError> {
        self.sync_interests()?;
        let mut serviced = false;
        if self.input.registration.needs_service() {
            self.read_input();
            serviced = true;
        }
        if self.output.registration.needs_service() {
            self.write_output();
            serviced = true;
        }
        if serviced {
            self.sync_interests()?;
        }
        Ok(())
    }

    fn sync_interests(&mut self) -> Result<(), PtyError> {
        let pty_open = self.pty.is_open();

        let wants_input = pty_open && !self.input.buffer.is_full();
        if let Some(fd) = self.input.fd.as_ref() {
            self.input
                .registration
                .update(&self.registry, fd.as_fd(), wants_input.then_some(Interest::READABLE))
                .map_err(PtyError::register)?;
        }

        if let Some(master) = self.pty.master.as_ref() {
            let readable = !self.output.buffer.is_full();
            let writable = !self.oob.is_empty() || !self.input.buffer.is_empty();
            let desired = match (readable, writable) {
                (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                (true, false) => Some(Interest::READABLE),
                (false, true) => Some(Interest::WRITABLE),
                (false, false) => None,
            };
            self.pty
                .registration
                .update(&self.registry, master.as_fd(), desired)
                .map_err(PtyError::register)?;
        }

        if let Some(fd) = self.output.fd.as_ref() {
            let wants_output = !self.output.buffer.is_empty();
            self.output
                .registration
                .update(&self.registry, fd.as_fd(), wants_output.then_some(Interest::WRITABLE))
                .map_err(PtyError::register)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) const fn input_paused(&self) -> bool {
        self.input.fd.is_some() && self.input.registration.interest.is_none()
    }

    #[cfg(test)]
    pub(crate) const fn input_open(&self) -> bool {
        self.input.is_open()
    }
}

impl Drop for PtyBridge {
    fn drop(&mut self) {
        self.tty = ControllingTerminal::Unavailable;
        self.output.close(Some(&self.registry));
        self.input.close(Some(&self.registry));
        self.pty.slave = None;
        self.close_pty();
        debug!(target: BRIDGE_TARGET, "bridge torn down");
    }
}
