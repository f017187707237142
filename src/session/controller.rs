//! Session Controller (C3): attach/detach handshake, the `wait` polling
//! primitive, command dispatch, and the two-phase receive loop (spec §4.3).

use crate::error::{Error, Result};
use crate::interpreter::{PostAction, Session};
use crate::interrupt;
use crate::logging::log;
use crate::logging::LogLevel::*;
use crate::session::{expr_check, selector};
use crate::transport::Transport;
use crate::wire::value::{self, WireValue};
use std::thread::sleep;
use std::time::{Duration, Instant};

const WAIT_TICK: Duration = Duration::from_millis(50);
const GC_THROTTLE: Duration = Duration::from_millis(10);
const DRAIN_BUDGET: usize = 50;

/// Why [`Controller::run`] stopped. Both cases are a clean exit from the
/// recv loop's point of view (spec §4.3: "the loop exits silently on
/// invalid-queue or removed-queue"); [`Controller::run`]'s caller decides
/// what to do next (detach, or nothing).
#[derive(Debug, Eq, PartialEq)]
pub enum LoopExit {
    Interrupted,
    TargetGone,
}

/// Drives one target's attach → configure → recv-loop → detach sequence.
/// Generic over [`Transport`] so tests substitute an in-memory fake instead
/// of real SysV queues.
pub struct Controller<T: Transport> {
    transport: T,
    session: Session,
    timeout: Duration,
}

impl<T: Transport> Controller<T> {
    pub fn new(transport: T, session: Session, timeout: Duration) -> Controller<T> {
        Controller {
            transport,
            session,
            timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Encode, send, and signal as one unit — Testable Property 5: no byte
    /// ever reaches `qout` without a following `SIGURG` in the same
    /// operation.
    fn send_command(&mut self, tuple: &[WireValue]) -> Result<()> {
        let bytes = value::encode(tuple)?;
        self.transport.send(&bytes)?;
        self.transport.signal()
    }

    /// Receive and interpret one message, if any is available. Spec §4.4's
    /// "Failure semantics for event processing" requires the offending
    /// event (or raw bytes, if the failure happens before any tag can be
    /// recovered) to be logged at the point the error is caught, before it
    /// is re-raised to terminate the loop.
    fn poll_once(&mut self, blocking: bool) -> Result<Option<PostAction>> {
        let bytes = match self.transport.recv(blocking)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let decoded = match value::decode(&bytes) {
            Ok(v) => v,
            Err(e) => {
                log!(LogError, "malformed message, raw bytes {:?}: {}", bytes, e);
                return Err(e);
            }
        };
        let event = match crate::interpreter::event::parse(&decoded) {
            Ok(ev) => ev,
            Err(e) => {
                log!(LogError, "malformed event {:?}: {}", decoded, e);
                return Err(e);
            }
        };
        match self.session.handle(event.clone()) {
            Ok(action) => Ok(Some(action)),
            Err(e) => {
                log!(LogError, "error processing event {:?}: {}", event, e);
                Err(e)
            }
        }
    }

    /// Non-blocking-drain up to `max` messages, throttling on `during_gc`
    /// and stopping early once the queue is empty.
    fn drain(&mut self, max: usize) -> Result<()> {
        for _ in 0..max {
            match self.poll_once(false)? {
                Some(PostAction::ThrottleGc) => {
                    sleep(GC_THROTTLE);
                    self.transport.signal()?;
                }
                Some(PostAction::None) => {}
                None => break,
            }
        }
        Ok(())
    }

    /// Poll at 50 ms intervals: drain up to 50 non-blocking receives per
    /// tick, sleep, re-signal, test the predicate. A user interrupt during
    /// the wait is absorbed — it prints a progress line and the loop
    /// resumes (spec §4.3, §5).
    pub fn wait(&mut self, reason: &str, timeout: Duration, mut predicate: impl FnMut(&Session) -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain(DRAIN_BUDGET)?;
            if predicate(&self.session) {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            if interrupt::take() {
                log!(LogInfo, "{}: {}s remaining", reason, remaining.as_secs());
            }
            sleep(WAIT_TICK);
            self.transport.signal()?;
        }
    }

    /// Send `attach controller_pid` and wait for the handshake. An
    /// `attached` reply citing a foreign controller pid surfaces as
    /// [`Error::AlreadyTraced`] straight out of [`Session::handle`] via the
    /// `?` inside `wait`'s drain.
    pub fn attach(&mut self) -> Result<()> {
        let controller_pid = self.session.controller_pid;
        self.send_command(&[WireValue::Str("attach".into()), WireValue::Int(controller_pid)])?;
        let timeout = self.timeout;
        if self.wait("attach", timeout, |s| s.attached)? {
            Ok(())
        } else {
            Err(Error::Timeout {
                reason: "attach".into(),
                secs: timeout.as_secs(),
            })
        }
    }

    /// Send `detach` and wait for the transition back to detached.
    /// Idempotent across *queue-removed* (spec §8 round-trip property):
    /// a target that already exited is treated as already detached.
    pub fn detach(&mut self) -> Result<()> {
        match self.send_command(&[WireValue::Str("detach".into())]) {
            Ok(()) => {}
            Err(Error::QueueRemoved(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        let timeout = self.timeout;
        match self.wait("detach", timeout, |s| !s.attached) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Timeout {
                reason: "detach".into(),
                secs: timeout.as_secs(),
            }),
            Err(Error::QueueRemoved(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn watch(&mut self, threshold_ms: i64) -> Result<()> {
        self.send_command(&[WireValue::Str("watch".into()), WireValue::Int(threshold_ms)])
    }

    pub fn watchcpu(&mut self, threshold_ms: i64) -> Result<()> {
        self.send_command(&[WireValue::Str("watchcpu".into()), WireValue::Int(threshold_ms)])
    }

    pub fn firehose(&mut self) -> Result<()> {
        self.send_command(&[WireValue::Str("firehose".into())])
    }

    pub fn devmode(&mut self) -> Result<()> {
        self.send_command(&[WireValue::Str("devmode".into())])
    }

    pub fn gc(&mut self) -> Result<()> {
        self.send_command(&[WireValue::Str("gc".into())])
    }

    /// Install a tracer on methods matched by `selector_text`, splitting any
    /// `(expr, ...)` argument list into `addexpr` follow-ups (spec §4.3).
    /// Every expression is syntax-checked before anything is sent.
    pub fn add(&mut self, selector_text: &str, slow: bool) -> Result<()> {
        let parsed = selector::parse(selector_text);
        for expr in &parsed.expressions {
            expr_check::validate(expr)?;
        }
        self.send_command(&[
            WireValue::Str("add".into()),
            WireValue::Str(parsed.selector.clone()),
            WireValue::Bool(slow),
        ])?;
        for expr in &parsed.expressions {
            self.send_command(&[WireValue::Str("addexpr".into()), WireValue::Str(expr.clone())])?;
        }
        Ok(())
    }

    /// Evaluate `source` in the target, waiting up to `timeout` for the
    /// `evaled` reply.
    pub fn eval(&mut self, source: &str, timeout: Duration) -> Result<String> {
        expr_check::validate(source)?;
        self.send_command(&[WireValue::Str("eval".into()), WireValue::Str(source.to_string())])?;
        self.session.last_evaled = None;
        if self.wait("eval", timeout, |s| s.last_evaled.is_some())? {
            Ok(self.session.last_evaled.take().unwrap())
        } else {
            Err(Error::Timeout {
                reason: "eval".into(),
                secs: timeout.as_secs(),
            })
        }
    }

    /// Ask the target to fork a paused sibling, waiting up to `timeout` for
    /// the `forked` reply.
    pub fn fork(&mut self, timeout: Duration) -> Result<i64> {
        self.send_command(&[WireValue::Str("fork".into())])?;
        self.session.last_forked_pid = None;
        if self.wait("fork", timeout, |s| s.last_forked_pid.is_some())? {
            Ok(self.session.last_forked_pid.take().unwrap())
        } else {
            Err(Error::Timeout {
                reason: "fork".into(),
                secs: timeout.as_secs(),
            })
        }
    }

    /// The steady-state recv loop: block for one message, dispatch it, then
    /// non-blocking-drain up to [`DRAIN_BUDGET`] more before blocking again
    /// (spec §4.3's two-phase pattern, so a burst can't fill the kernel
    /// buffer while we're slow to loop back around).
    pub fn run(&mut self) -> Result<LoopExit> {
        loop {
            if interrupt::take() {
                return Ok(LoopExit::Interrupted);
            }
            match self.poll_once(true) {
                Ok(Some(PostAction::ThrottleGc)) => {
                    sleep(GC_THROTTLE);
                    self.transport.signal()?;
                }
                Ok(Some(PostAction::None)) | Ok(None) => {}
                Err(Error::QueueRemoved(_)) => return Ok(LoopExit::TargetGone),
                Err(e) => return Err(e),
            }
            self.drain(DRAIN_BUDGET)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakeTransport;
    use crate::wire::value::encode;

    fn session() -> Session {
        Session::new(4242, 1000, Box::new(Vec::new()), false, true, "  ".into())
    }

    fn push_event(t: &mut FakeTransport, tuple: Vec<WireValue>) {
        t.inbound.push_back(encode(&tuple).unwrap());
    }

    #[test]
    fn attach_succeeds_on_matching_reply() {
        let mut t = FakeTransport::default();
        push_event(&mut t, vec![WireValue::Str("attached".into()), WireValue::Int(4242)]);
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        c.attach().unwrap();
        assert!(c.session().attached);
    }

    #[test]
    fn attach_fails_on_foreign_owner() {
        let mut t = FakeTransport::default();
        push_event(&mut t, vec![WireValue::Str("attached".into()), WireValue::Int(9999)]);
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        let err = c.attach().unwrap_err();
        assert!(matches!(err, Error::AlreadyTraced { .. }));
    }

    #[test]
    fn every_send_command_is_followed_by_a_signal() {
        let t = FakeTransport::default();
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        c.firehose().unwrap();
        assert_eq!(c.transport.outbound.len(), 1);
        assert_eq!(c.transport.signals, 1);
    }

    #[test]
    fn add_with_argument_expressions_sends_add_then_addexpr() {
        let t = FakeTransport::default();
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        c.add("Foo#bar(x, y)", false).unwrap();
        assert_eq!(c.transport.outbound.len(), 3);
    }

    #[test]
    fn add_rejects_unbalanced_expression_before_sending_anything() {
        let t = FakeTransport::default();
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        let err = c.add("Foo#bar(x(", false).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(..)));
        assert!(c.transport.outbound.is_empty());
    }

    #[test]
    fn detach_against_already_removed_queue_is_a_clean_noop() {
        struct GoneTransport;
        impl Transport for GoneTransport {
            fn send(&mut self, _: &[u8]) -> Result<()> {
                Err(Error::QueueRemoved(1000))
            }
            fn recv(&mut self, _: bool) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }
            fn signal(&mut self) -> Result<()> {
                Ok(())
            }
        }
        let mut c = Controller::new(GoneTransport, session(), Duration::from_millis(200));
        c.detach().unwrap();
    }

    #[test]
    fn run_exits_cleanly_when_queue_is_removed() {
        struct OneShotGone(bool);
        impl Transport for OneShotGone {
            fn send(&mut self, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn recv(&mut self, _: bool) -> Result<Option<Vec<u8>>> {
                if self.0 {
                    self.0 = false;
                    Err(Error::QueueRemoved(1000))
                } else {
                    Ok(None)
                }
            }
            fn signal(&mut self) -> Result<()> {
                Ok(())
            }
        }
        let mut c = Controller::new(OneShotGone(true), session(), Duration::from_millis(200));
        assert_eq!(c.run().unwrap(), LoopExit::TargetGone);
    }

    #[test]
    fn run_throttles_and_resignals_when_during_gc_arrives_on_the_blocking_call() {
        // `during_gc` unblocking the *primary* `msgrcv`, not just a drain
        // tick, must still trigger the sleep+resignal throttle.
        struct DuringGcThenGone(u32, u32);
        impl Transport for DuringGcThenGone {
            fn send(&mut self, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn recv(&mut self, _: bool) -> Result<Option<Vec<u8>>> {
                self.0 += 1;
                match self.0 {
                    1 => Ok(Some(encode(&[WireValue::Str("during_gc".into())]).unwrap())),
                    2 => Ok(None),
                    _ => Err(Error::QueueRemoved(1000)),
                }
            }
            fn signal(&mut self) -> Result<()> {
                self.1 += 1;
                Ok(())
            }
        }
        let mut c = Controller::new(DuringGcThenGone(0, 0), session(), Duration::from_millis(200));
        assert_eq!(c.run().unwrap(), LoopExit::TargetGone);
        assert!(c.transport.1 >= 1, "expected at least one resignal after during_gc");
    }

    #[test]
    fn poll_once_logs_and_propagates_a_malformed_message() {
        let mut t = FakeTransport::default();
        t.inbound.push_back(vec![0xffu8; crate::wire::BUF_SIZE]);
        let mut c = Controller::new(t, session(), Duration::from_millis(200));
        let err = c.poll_once(true).unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)));
    }
}
