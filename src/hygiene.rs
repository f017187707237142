//! Stale-queue hygiene probe (C8, spec §5 "Stale-queue reclaim" and the
//! `/proc/sys/kernel/msgmnb` advisory). Explicitly non-functional: every
//! operation here is best-effort, never privileged, and failure is only
//! ever logged, never propagated — spec §5 is explicit that "the core need
//! not implement it to be correct."

use crate::logging::log;
use crate::logging::LogLevel::*;
use std::fs;
use std::process::Command;

const RECOMMENDED_MSGMNB: u64 = 1024 * 1024;

/// Scan `ipcs -q` for queues whose positive-pid half names a dead process
/// and remove them. Silently does nothing if `ipcs` isn't on `PATH` or its
/// output doesn't parse the way we expect.
pub fn scan_stale_queues() {
    let output = match Command::new("ipcs").arg("-q").output() {
        Ok(o) if o.status.success() => o,
        _ => {
            log!(LogDebug, "ipcs not available; skipping stale-queue scan");
            return;
        }
    };
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let key = match fields.first().and_then(|s| s.parse::<i64>().ok()) {
            Some(k) if k > 0 => k,
            _ => continue,
        };
        if !process_is_alive(key as libc::pid_t) {
            remove_queue(key, &fields);
        }
    }
}

fn process_is_alive(pid: libc::pid_t) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn remove_queue(key: i64, fields: &[&str]) {
    let msqid = match fields.get(1).and_then(|s| s.parse::<libc::c_int>().ok()) {
        Some(id) => id,
        None => return,
    };
    let rc = unsafe { libc::msgctl(msqid, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc == 0 {
        log!(LogDebug, "removed stale queue key={} msqid={}", key, msqid);
    }
}

/// Read `/proc/sys/kernel/msgmnb` and log an advisory if it's below the
/// recommended size. Never writes; raising the limit is left to the
/// operator.
pub fn advise_msgmnb() {
    let text = match fs::read_to_string("/proc/sys/kernel/msgmnb") {
        Ok(t) => t,
        Err(_) => return,
    };
    if let Ok(n) = text.trim().parse::<u64>() {
        if n < RECOMMENDED_MSGMNB {
            log!(
                LogWarn,
                "kernel.msgmnb is {} bytes, below the recommended {}; bursty traces may drop events",
                n,
                RECOMMENDED_MSGMNB
            );
        }
    }
}
