//! PTY (pseudo-terminal) management for spawning and communicating with agents.
//!
//! Provides a clean interface for:
//! - Creating a PTY and spawning a child in its own session / process group
//! - Poll-bounded reads of the child's output
//! - Writing input to the child
//! - Signalling and reaping the whole process group

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execvpe, fork, read, setsid, write, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Maximum time a single write may spend retrying on a full terminal buffer
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one poll-bounded read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Nothing arrived within the poll timeout
    Idle,
    /// The child closed its side of the terminal
    Eof,
}

/// PTY handle for communicating with the child process
#[derive(Debug)]
pub struct Pty {
    /// Master file descriptor
    master_fd: OwnedFd,
    /// Child process ID (also its process group ID)
    child_pid: Pid,
}

impl Pty {
    /// Create a new PTY and spawn the given command with the terminal as
    /// its stdin/stdout/stderr.
    ///
    /// `TERM`, `COLUMNS` and `LINES` are fixed so the child renders for a
    /// known terminal regardless of the bridge's own environment.
    pub fn spawn(command: &[String], rows: u16, cols: u16) -> Result<Self> {
        if command.is_empty() {
            anyhow::bail!("Command cannot be empty");
        }

        // Everything the child needs is prepared before fork
        let program = CString::new(command[0].as_str()).context("Invalid program name")?;
        let args = command
            .iter()
            .map(|s| CString::new(s.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Invalid command argument")?;
        let env = terminal_env(rows, cols)?;

        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // Open PTY pair
        let OpenptyResult { master, slave } =
            openpty(&winsize, None).context("Failed to open PTY")?;

        // Fork
        match unsafe { fork() }.context("Failed to fork")? {
            ForkResult::Parent { child } => {
                // Close slave in parent
                drop(slave);

                // Set master to non-blocking
                let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)?;
                let flags = OFlag::from_bits_truncate(flags);
                fcntl(
                    master.as_raw_fd(),
                    FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
                )?;

                info!("Spawned child process with PID {}", child);

                Ok(Self {
                    master_fd: master,
                    child_pid: child,
                })
            }
            ForkResult::Child => {
                // Close master in child
                drop(master);

                // New session: the child leads its own process group
                setsid().ok();

                // Set controlling terminal
                unsafe {
                    libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY as libc::c_ulong, 0);
                }

                // Redirect stdin/stdout/stderr to slave
                let slave_raw = slave.as_raw_fd();
                dup2(slave_raw, libc::STDIN_FILENO).ok();
                dup2(slave_raw, libc::STDOUT_FILENO).ok();
                dup2(slave_raw, libc::STDERR_FILENO).ok();

                // Close original slave fd if it's not 0, 1, or 2
                if slave_raw > 2 {
                    drop(slave);
                }

                let _ = execvpe(&program, &args, &env);
                // exec failed: the parent sees an immediate exit
                unsafe { libc::_exit(127) }
            }
        }
    }

    /// Get the child process ID
    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// Wait up to `timeout` for output, then read whatever is available
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<ReadEvent, Errno> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.master_fd.as_fd(), PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => return Ok(ReadEvent::Idle),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(ReadEvent::Idle),
            Err(e) => return Err(e),
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if !revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            return Ok(ReadEvent::Idle);
        }

        match read(self.master_fd.as_raw_fd(), buf) {
            Ok(0) => Ok(ReadEvent::Eof),
            Ok(n) => Ok(ReadEvent::Data(n)),
            Err(Errno::EAGAIN) => Ok(ReadEvent::Idle),
            // EIO means the child closed the terminal
            Err(Errno::EIO) => Ok(ReadEvent::Eof),
            Err(e) => Err(e),
        }
    }

    /// Write all of `data` to the PTY, retrying while the terminal buffer is full
    pub fn write_all(&self, data: &[u8]) -> Result<(), Errno> {
        let start = Instant::now();
        let mut written = 0;

        while written < data.len() {
            match write(&self.master_fd, &data[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                    if start.elapsed() > WRITE_TIMEOUT {
                        return Err(Errno::EAGAIN);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Check child status without blocking. Returns the exit code once the
    /// child has exited (128 + signal number if it was killed).
    pub fn check_child(&self) -> Option<i32> {
        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Some(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => Some(128 + sig as i32),
            Ok(WaitStatus::StillAlive) => None,
            Ok(_) => None,
            Err(_) => Some(-1),
        }
    }

    /// Send a signal to the child's whole process group
    pub fn signal_group(&self, sig: Signal) -> Result<()> {
        killpg(self.child_pid, sig)?;
        Ok(())
    }

    /// Whether any process is left in the child's process group
    fn group_alive(&self) -> bool {
        killpg(self.child_pid, None).is_ok()
    }

    /// Terminate the process group: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// The group is signalled even when the leader has already exited, since
    /// processes it spawned may still hold the terminal. Errors are ignored;
    /// the group may already be gone.
    pub fn terminate(&self, grace: Duration) {
        let _ = self.signal_group(Signal::SIGTERM);

        let start = Instant::now();
        loop {
            if self.check_child().is_some() && !self.group_alive() {
                debug!("Process group {} exited after SIGTERM", self.child_pid);
                return;
            }
            if start.elapsed() >= grace {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        debug!("Process group {} still alive after {:?}, sending SIGKILL", self.child_pid, grace);
        let _ = self.signal_group(Signal::SIGKILL);
        if self.check_child().is_none() {
            let _ = waitpid(self.child_pid, None);
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        let _ = self.signal_group(Signal::SIGKILL);
        if self.check_child().is_none() {
            let _ = waitpid(self.child_pid, None);
        }
    }
}

/// Inherited environment with fixed terminal variables
fn terminal_env(rows: u16, cols: u16) -> Result<Vec<CString>> {
    let overrides = [
        ("TERM", "xterm-256color".to_string()),
        ("COLUMNS", cols.to_string()),
        ("LINES", rows.to_string()),
    ];

    std::env::vars()
        .filter(|(key, _)| !overrides.iter().any(|(k, _)| k == key))
        .chain(overrides.iter().map(|(k, v)| (k.to_string(), v.clone())))
        .map(|(key, value)| {
            CString::new(format!("{key}={value}")).context("Invalid environment variable")
        })
        .collect()
}
