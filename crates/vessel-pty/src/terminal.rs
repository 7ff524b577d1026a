//! Terminal attribute helpers.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::fs::{Mode, OFlags};
use rustix::termios::{OptionalActions, SpecialCodeIndex, Termios};
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTSTP};

use crate::error::PtyError;

/// Control characters used when no terminal can be asked.
const DEFAULT_INTR: u8 = 0x03;
const DEFAULT_QUIT: u8 = 0x1c;
const DEFAULT_SUSP: u8 = 0x1a;

/// `_POSIX_VDISABLE` on Linux.
const DISABLED: u8 = 0;

/// Which flags of the original attributes survive the switch to raw mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keep {
    /// Keep output processing; used for the side we read from.
    OutputModes,
    /// Keep input processing; used for the side we write to.
    InputModes,
}

/// Saves the attributes of `fd` and puts it in raw mode.
///
/// Returns `None` when `fd` is not a terminal.
pub(crate) fn make_raw(fd: BorrowedFd<'_>, keep: Keep) -> Result<Option<Termios>, PtyError> {
    if !rustix::termios::isatty(fd) {
        return Ok(None);
    }
    let saved = rustix::termios::tcgetattr(fd).map_err(|errno| PtyError::setup("tcgetattr", errno))?;
    let mut raw = saved.clone();
    raw.make_raw();
    match keep {
        Keep::OutputModes => raw.output_modes = saved.output_modes,
        Keep::InputModes => raw.input_modes = saved.input_modes,
    }
    rustix::termios::tcsetattr(fd, OptionalActions::Now, &raw)
        .map_err(|errno| PtyError::setup("tcsetattr", errno))?;
    Ok(Some(saved))
}

/// Restores previously saved attributes.
pub(crate) fn restore(fd: BorrowedFd<'_>, saved: &Termios) -> rustix::io::Result<()> {
    rustix::termios::tcsetattr(fd, OptionalActions::Now, saved)
}

/// Copies the window size of `from` onto `to`.
pub(crate) fn copy_window_size(from: BorrowedFd<'_>, to: BorrowedFd<'_>) -> rustix::io::Result<()> {
    let size = rustix::termios::tcgetwinsize(from)?;
    rustix::termios::tcsetwinsize(to, size)
}

/// Opens the controlling terminal without making it ours.
pub(crate) fn open_controlling_terminal() -> rustix::io::Result<OwnedFd> {
    rustix::fs::open(
        "/dev/tty",
        OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC | OFlags::NONBLOCK,
        Mode::empty(),
    )
}

/// Byte a terminal would produce for `signal`, if any.
///
/// `attributes` are the attributes of the controlling terminal; without them
/// the usual defaults apply. Disabled characters yield `None`.
pub(crate) fn control_byte(signal: i32, attributes: Option<&Termios>) -> Option<u8> {
    let (index, fallback) = match signal {
        SIGINT => (SpecialCodeIndex::VINTR, DEFAULT_INTR),
        SIGQUIT => (SpecialCodeIndex::VQUIT, DEFAULT_QUIT),
        SIGTSTP => (SpecialCodeIndex::VSUSP, DEFAULT_SUSP),
        _ => return None,
    };
    let byte = attributes.map_or(fallback, |termios| termios.special_codes[index]);
    (byte != DISABLED).then_some(byte)
}

/// Returns true when both descriptors refer to the same file.
pub(crate) fn same_file(first: impl AsFd, second: impl AsFd) -> bool {
    match (rustix::fs::fstat(first), rustix::fs::fstat(second)) {
        (Ok(a), Ok(b)) => a.st_dev == b.st_dev && a.st_ino == b.st_ino,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use signal_hook::consts::signal::{SIGTERM, SIGWINCH};

    use super::*;

    #[rstest]
    #[case(SIGINT, Some(0x03))]
    #[case(SIGQUIT, Some(0x1c))]
    #[case(SIGTSTP, Some(0x1a))]
    #[case(SIGWINCH, None)]
    #[case(SIGTERM, None)]
    fn defaults_apply_without_a_terminal(#[case] signal: i32, #[case] expected: Option<u8>) {
        assert_eq!(control_byte(signal, None), expected);
    }

    #[test]
    fn non_terminals_are_left_alone() {
        let file = std::fs::File::open("/dev/null").expect("open /dev/null");
        let saved = make_raw(file.as_fd(), Keep::OutputModes).expect("make raw");
        assert!(saved.is_none());
    }
}
