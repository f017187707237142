//! Queue Transport (C1): open/send/recv on the SysV queue pair, and the
//! `SIGURG` doorbell used to wake the target (spec §4.1).
//!
//! `msgget`/`msgsnd`/`msgrcv` are called directly through `libc` rather than
//! through `nix::sys::msg`, whose `Msg` marker-trait wrapper assumes a
//! statically-typed, crate-defined message struct; here the payload is a
//! runtime-sized, self-describing buffer, so the raw syscalls are clearer.
//! `nix::errno` still does the error classification.

use crate::error::{Error, Result};
use crate::logging::log;
use crate::logging::LogLevel::*;
use crate::wire::message::{RawMessage, BUF_SIZE, MTYPE_APP};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::Duration;

const ATTACH_RETRIES: u32 = 5;
const ATTACH_RETRY_INTERVAL: Duration = Duration::from_millis(150);

/// The doorbell signal: SysV queues have no notification mechanism of their
/// own, so the target polls its command queue whenever it receives this.
pub const WAKEUP_SIGNAL: Signal = Signal::SIGURG;

fn qin_key(pid: libc::pid_t) -> libc::key_t {
    pid as libc::key_t
}

fn qout_key(pid: libc::pid_t) -> libc::key_t {
    -(pid as libc::key_t)
}

/// Anything that can carry the controller<->target byte stream. Abstracted
/// behind a trait so tests can substitute an in-memory channel instead of
/// real SysV queues (see `session::controller::tests`).
pub trait Transport {
    fn send(&mut self, payload: &[u8]) -> Result<()>;
    fn recv(&mut self, blocking: bool) -> Result<Option<Vec<u8>>>;
    fn signal(&mut self) -> Result<()>;
}

/// Retry a syscall wrapper across spurious `EINTR`, the one genuinely
/// transient condition every blocking/non-blocking queue operation can hit.
fn retry_eintr<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn msgget(key: libc::key_t, flags: libc::c_int) -> nix::Result<libc::c_int> {
    Errno::result(unsafe { libc::msgget(key, flags) })
}

pub struct QueueTransport {
    pid: libc::pid_t,
    qin: libc::c_int,
    qout: libc::c_int,
}

impl QueueTransport {
    /// Attach to an already-running target's queue pair. Spaced retries
    /// double as the initial wakeup: the target may not yet have drained its
    /// startup path and created the queues when we first look.
    pub fn open(pid: libc::pid_t) -> Result<QueueTransport> {
        signal::kill(Pid::from_raw(pid), None).map_err(|e| match e {
            Errno::EPERM => Error::PermissionDenied(pid),
            Errno::ESRCH => Error::InvalidPid(pid.to_string()),
            other => Error::Errno(other),
        })?;

        for attempt in 0..ATTACH_RETRIES {
            let _ = signal::kill(Pid::from_raw(pid), WAKEUP_SIGNAL);
            if let (Ok(qin), Ok(qout)) = (msgget(qin_key(pid), 0), msgget(qout_key(pid), 0)) {
                if qin >= 0 && qout >= 0 {
                    return Ok(QueueTransport { pid, qin, qout });
                }
            }
            log!(
                LogDebug,
                "attempt {}/{} to find queue pair for pid {} failed",
                attempt + 1,
                ATTACH_RETRIES,
                pid
            );
            if attempt + 1 < ATTACH_RETRIES {
                sleep(ATTACH_RETRY_INTERVAL);
            }
        }
        Err(Error::AgentNotListening(pid))
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

impl Transport for QueueTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let msg = RawMessage::new(payload);
        let result = retry_eintr(|| {
            Errno::result(unsafe {
                libc::msgsnd(
                    self.qout,
                    &msg as *const RawMessage as *const libc::c_void,
                    BUF_SIZE,
                    0,
                )
            })
        });
        match result {
            Ok(_) => Ok(()),
            Err(Errno::EIDRM) | Err(Errno::EINVAL) => Err(Error::QueueRemoved(self.pid)),
            Err(e) => Err(Error::Errno(e)),
        }
    }

    fn recv(&mut self, blocking: bool) -> Result<Option<Vec<u8>>> {
        let flags = if blocking { 0 } else { libc::IPC_NOWAIT };

        #[repr(C)]
        struct Recv {
            mtype: libc::c_long,
            mtext: [u8; BUF_SIZE],
        }
        let mut msg = Recv {
            mtype: 0,
            mtext: [0u8; BUF_SIZE],
        };

        let result = retry_eintr(|| {
            Errno::result(unsafe {
                libc::msgrcv(
                    self.qin,
                    &mut msg as *mut Recv as *mut libc::c_void,
                    BUF_SIZE,
                    MTYPE_APP,
                    flags,
                )
            })
        });

        match result {
            Ok(_) => Ok(Some(msg.mtext.to_vec())),
            Err(Errno::ENOMSG) | Err(Errno::EAGAIN) => Ok(None),
            Err(Errno::EIDRM) | Err(Errno::EINVAL) => Err(Error::QueueRemoved(self.pid)),
            Err(e) => Err(Error::Errno(e)),
        }
    }

    fn signal(&mut self) -> Result<()> {
        signal::kill(Pid::from_raw(self.pid), WAKEUP_SIGNAL).map_err(|e| match e {
            Errno::EPERM => Error::PermissionDenied(self.pid),
            Errno::ESRCH => Error::QueueRemoved(self.pid),
            other => Error::Errno(other),
        })
    }
}

impl Drop for QueueTransport {
    fn drop(&mut self) {
        // The target owns queue lifecycle (spec §3); the controller never
        // removes the queues, only its own handles go out of scope.
    }
}
