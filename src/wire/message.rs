//! Fixed-layout SysV message record.
//!
//! `mtype` is always `1` for application traffic (see spec §3); `mtext` is
//! padded to exactly [`BUF_SIZE`] bytes, a hard wire-compatibility constant
//! agreed with the target agent at build time, not negotiated on the wire.

use static_assertions::const_assert;

#[cfg(target_os = "linux")]
pub const BUF_SIZE: usize = 256;

#[cfg(not(target_os = "linux"))]
pub const BUF_SIZE: usize = 120;

const_assert!(BUF_SIZE == 256 || BUF_SIZE == 120);

/// Application message type tag. The protocol defines only this one.
pub const MTYPE_APP: libc::c_long = 1;

/// Layout matching the kernel's `struct msgbuf { long mtype; char mtext[]; }`
/// for our fixed `mtext` size.
#[repr(C)]
pub struct RawMessage {
    pub mtype: libc::c_long,
    pub mtext: [u8; BUF_SIZE],
}

impl RawMessage {
    /// Build a zero-padded message from a payload no longer than `BUF_SIZE`.
    ///
    /// Panics if `payload.len() > BUF_SIZE`; callers must have already
    /// rejected oversize commands via [`crate::wire::value::encode`].
    pub fn new(payload: &[u8]) -> RawMessage {
        assert!(payload.len() <= BUF_SIZE);
        let mut mtext = [0u8; BUF_SIZE];
        mtext[..payload.len()].copy_from_slice(payload);
        RawMessage {
            mtype: MTYPE_APP,
            mtext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_payload_with_zeroes() {
        let msg = RawMessage::new(&[1, 2, 3]);
        assert_eq!(msg.mtype, MTYPE_APP);
        assert_eq!(&msg.mtext[..3], &[1, 2, 3]);
        assert!(msg.mtext[3..].iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic]
    fn rejects_oversize_payload() {
        RawMessage::new(&[0u8; BUF_SIZE + 1]);
    }
}
