//! PID validation (spec §7 *invalid-pid*: "PID zero, non-numeric, or
//! signal-check denies existence").

use crate::error::{Error, Result};

/// Reject a PID that cannot possibly name a tracing target. The
/// signal-check half of *invalid-pid* happens later, inside
/// [`crate::transport::QueueTransport::open`], which already distinguishes
/// "no such process" from "permission denied".
pub fn validate(pid: libc::pid_t) -> Result<()> {
    if pid <= 0 {
        return Err(Error::InvalidPid(pid.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_negative() {
        assert!(validate(0).is_err());
        assert!(validate(-1).is_err());
    }

    #[test]
    fn accepts_positive_pid() {
        assert!(validate(4242).is_ok());
    }
}
