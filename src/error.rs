use thiserror::Error;

/// Every failure mode the controller can surface to its caller.
///
/// Transient, OS-level interruptions (`EINTR`, `EAGAIN`/`ENOMSG`) are not
/// represented here: they are retried or treated as "nothing to do" inside
/// [`crate::transport`] and never escape it. See spec §7 for the
/// disposition of each variant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pid: {0}")]
    InvalidPid(String),

    #[error("permission denied signalling pid {0}; try running with elevated privilege")]
    PermissionDenied(libc::pid_t),

    #[error("agent not listening on pid {0} after 5 attempts; is the tracing agent loaded?")]
    AgentNotListening(libc::pid_t),

    #[error("process {pid} is already being traced ({other} != {mine})")]
    AlreadyTraced {
        pid: libc::pid_t,
        other: libc::pid_t,
        mine: libc::pid_t,
    },

    #[error("encoded command is {len} bytes, exceeds the {cap} byte budget")]
    CommandTooLarge { len: usize, cap: usize },

    #[error("invalid expression {0:?}: {1}")]
    InvalidExpression(String, String),

    #[error("queue for pid {0} was removed; target process is gone")]
    QueueRemoved(libc::pid_t),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("{reason} timed out after {secs}s")]
    Timeout { reason: String, secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, Error>;
