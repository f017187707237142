//! Event Interpreter & Renderer (C4): the stateful machine that folds the
//! unordered little event stream into a nested, timestamped call tree
//! (spec §4.4).
//!
//! All process-wide mutable state the source kept at module scope — render
//! cursor, GC bracket, symbol tables — is folded into a single [`Session`]
//! value owned by the event loop and passed by exclusive reference, per
//! spec §9's explicit re-architecture note.

pub mod event;

use crate::error::{Error, Result};
use crate::logging::log;
use crate::logging::LogLevel::*;
use crate::session::tracer::{Tracer, TracerTable};
use event::Event;
use std::collections::HashMap;
use std::io::Write;

/// Told back to the caller so the recv loop knows whether to throttle
/// itself while the target is mid-collection (spec §4.4 `during_gc`).
#[derive(Debug, Eq, PartialEq)]
pub enum PostAction {
    None,
    ThrottleGc,
}

/// All render/attach/symbol state for one target pid (spec §3).
pub struct Session {
    pub methods: HashMap<i64, String>,
    pub classes: HashMap<i64, String>,
    pub tracers: TracerTable,

    pub controller_pid: i64,
    pub target_pid: i64,
    pub attached: bool,
    /// Set by the `forked`/`evaled` replies; consumed (and cleared) by
    /// [`crate::session::controller::Controller::fork`] /
    /// [`crate::session::controller::Controller::eval`]'s `wait` predicate.
    pub last_forked_pid: Option<i64>,
    pub last_evaled: Option<String>,

    pub nesting: i64,
    pub max_nesting_seen: i64,
    pub last_nesting: i64,
    pub gc_start_us: Option<i64>,

    pub show_time: bool,
    pub show_duration: bool,
    pub prefix_string: String,

    sink: Box<dyn Write + Send>,
    /// True if the sink's current line has content not yet terminated by a
    /// newline.
    line_open: bool,
    /// True if the very last thing written was the blank-line grouping
    /// separator, so we never emit two in a row (Testable Property 3).
    printed_blank: bool,
    /// The tracer whose call line is the most recently rendered and not
    /// yet closed by a return or forced shut by another tracer's call.
    open_tracer: Option<i64>,
}

impl Session {
    pub fn new(
        controller_pid: i64,
        target_pid: i64,
        sink: Box<dyn Write + Send>,
        show_time: bool,
        show_duration: bool,
        prefix_string: String,
    ) -> Session {
        Session {
            methods: HashMap::new(),
            classes: HashMap::new(),
            tracers: TracerTable::default(),
            controller_pid,
            target_pid,
            attached: false,
            last_forked_pid: None,
            last_evaled: None,
            nesting: 0,
            max_nesting_seen: 0,
            last_nesting: 0,
            gc_start_us: None,
            show_time,
            show_duration,
            prefix_string,
            sink,
            line_open: false,
            printed_blank: false,
            open_tracer: None,
        }
    }

    fn qualified_name(&self, mid: i64, is_singleton: bool, klass_id: i64) -> String {
        match self.methods.get(&mid) {
            None => "(unknown)".to_string(),
            Some(mname) => {
                let klass = self
                    .classes
                    .get(&klass_id)
                    .cloned()
                    .unwrap_or_else(|| klass_id.to_string());
                let sep = if is_singleton { "." } else { "#" };
                format!("{}{}{}", klass, sep, mname)
            }
        }
    }

    fn close_open_arglist(&mut self, tracer_id: i64) -> Result<()> {
        if let Some(t) = self.tracers.get_mut(tracer_id) {
            if t.arglist_open {
                write!(self.sink, ")")?;
                t.arglist_open = false;
            }
        }
        Ok(())
    }

    /// Dispatch one decoded event, mutating render state and writing to the
    /// sink. Any error here is fatal to the recv loop (spec §4.4): a
    /// malformed stream can't be skipped without risking desynchronized
    /// call/return bookkeeping.
    pub fn handle(&mut self, event: Event) -> Result<PostAction> {
        match event {
            Event::Attached { tracer_pid } => self.handle_attached(tracer_pid)?,
            Event::Detached { tracer_pid } => self.handle_detached(tracer_pid),
            Event::Mid { id, name } => {
                self.methods.insert(id, name);
            }
            Event::Klass { id, name } => {
                self.classes.insert(id, name);
            }
            Event::Add { tracer_id, query } => self.handle_add(tracer_id, query),
            Event::NewExpr { tracer_id, expr_id, expr } => {
                self.tracers.get_or_insert(tracer_id).expressions.insert(expr_id, expr);
            }
            Event::ExprVal { tracer_id, expr_id, value } => {
                self.handle_exprval(tracer_id, expr_id, value)?
            }
            Event::Call {
                time_us,
                tracer_id,
                mid,
                is_singleton,
                klass_id,
            } => self.render_call(time_us, tracer_id, mid, is_singleton, klass_id)?,
            Event::Return { time_us, tracer_id } => self.render_return(time_us, tracer_id)?,
            Event::Slow {
                time_us,
                duration_us,
                nesting,
                mid,
                is_singleton,
                klass_id,
            } => self.render_slow(time_us, duration_us, nesting, mid, is_singleton, klass_id)?,
            Event::GcStart { time_us } => self.render_gc_start(time_us)?,
            Event::GcEnd { time_us } => self.render_gc_end(time_us)?,
            Event::Gc { time_us } => self.render_gc(time_us)?,
            Event::DuringGc => return Ok(PostAction::ThrottleGc),
            Event::Forked { pid } => self.last_forked_pid = Some(pid),
            Event::Evaled { result } => self.last_evaled = Some(result),
            Event::Unknown { tag, payload } => {
                log!(LogWarn, "unknown event: {} {:?}", tag, payload);
            }
        }
        Ok(PostAction::None)
    }

    fn handle_attached(&mut self, tracer_pid: i64) -> Result<()> {
        if tracer_pid == self.controller_pid {
            self.attached = true;
            log!(LogInfo, "attached to process {}", self.target_pid);
            Ok(())
        } else {
            Err(Error::AlreadyTraced {
                pid: self.target_pid as libc::pid_t,
                other: tracer_pid as libc::pid_t,
                mine: self.controller_pid as libc::pid_t,
            })
        }
    }

    fn handle_detached(&mut self, tracer_pid: i64) {
        let _ = tracer_pid;
        self.attached = false;
        log!(LogInfo, "detached from process {}", self.target_pid);
    }

    fn handle_add(&mut self, tracer_id: i64, query: String) {
        if tracer_id == -1 {
            log!(LogWarn, "failed to install tracer for {:?}", query);
            return;
        }
        self.tracers.insert(tracer_id, Tracer::new(query));
    }

    fn handle_exprval(&mut self, tracer_id: i64, expr_id: i64, value: String) -> Result<()> {
        let name = self
            .tracers
            .get_or_insert(tracer_id)
            .expressions
            .get(&expr_id)
            .cloned()
            .unwrap_or_else(|| expr_id.to_string());
        let piece = format!("{}={}", name, value);

        if self.open_tracer == Some(tracer_id) {
            let t = self.tracers.get_or_insert(tracer_id);
            if t.arglist_open {
                write!(self.sink, ", {}", piece)?;
            } else {
                write!(self.sink, "({}", piece)?;
                t.arglist_open = true;
            }
        } else {
            let t = self.tracers.get_or_insert(tracer_id);
            if t.arglist_open {
                t.pending_arglist.push_str(&format!(", {}", piece));
            } else {
                t.pending_arglist = format!("({}", piece);
                t.arglist_open = true;
            }
        }
        Ok(())
    }

    fn render_call(
        &mut self,
        time_us: i64,
        tracer_id: i64,
        mid: i64,
        is_singleton: bool,
        klass_id: i64,
    ) -> Result<()> {
        let qname = self.qualified_name(mid, is_singleton, klass_id);

        if let Some(other) = self.open_tracer {
            if other != tracer_id {
                self.close_open_arglist(other)?;
            }
        }
        if self.line_open {
            writeln!(self.sink)?;
        }
        self.printed_blank = false;

        if self.show_time {
            write!(self.sink, "{}", format_clock(time_us))?;
        }
        write!(
            self.sink,
            "{}{}",
            self.prefix_string.repeat(self.nesting.max(0) as usize),
            qname
        )?;
        self.line_open = true;
        self.open_tracer = Some(tracer_id);

        let tracer = self.tracers.get_or_insert(tracer_id);
        if tracer.arglist_open && !tracer.pending_arglist.is_empty() {
            let pending = std::mem::take(&mut tracer.pending_arglist);
            write!(self.sink, "{}", pending)?;
        }
        tracer.call_stack.push((time_us, qname.clone()));
        tracer.last_printed = Some(format!("{}:{}", qname, self.nesting));

        self.nesting += 1;
        if self.nesting > self.max_nesting_seen {
            self.max_nesting_seen = self.nesting;
        }
        self.last_nesting = self.nesting;
        Ok(())
    }

    fn render_return(&mut self, time_us: i64, tracer_id: i64) -> Result<()> {
        let popped = {
            let tracer = self.tracers.get_or_insert(tracer_id);
            tracer.call_stack.pop()
        };
        // Missing-return-for-call: an empty stack is absorbed, not fatal
        // (spec §4.4, §7).
        let (start_us, _qname_at_call) = match popped {
            Some(frame) => frame,
            None => return Ok(()),
        };

        let duration_us = time_us - start_us;
        let depth = (self.nesting - 1).max(0);
        self.nesting = (self.nesting - 1).max(0);
        self.last_nesting = self.nesting;

        let collapse = self.open_tracer == Some(tracer_id);
        if collapse {
            let tracer = self.tracers.get_or_insert(tracer_id);
            if tracer.arglist_open {
                write!(self.sink, ")")?;
                tracer.arglist_open = false;
            }
            if self.show_duration {
                write!(self.sink, "{}", format_duration(duration_us))?;
            }
            writeln!(self.sink)?;
            self.line_open = false;
            self.open_tracer = None;
        } else {
            let qname = self.qualified_name_for_return(tracer_id, depth);
            if self.line_open {
                writeln!(self.sink)?;
            }
            if self.show_time {
                write!(self.sink, "{}", format_clock(time_us))?;
            }
            write!(self.sink, "{}{}", self.prefix_string.repeat(depth as usize), qname)?;
            if self.show_duration {
                write!(self.sink, "{}", format_duration(duration_us))?;
            }
            writeln!(self.sink)?;
            self.line_open = false;
        }
        self.printed_blank = false;

        if self.nesting == 0 && self.max_nesting_seen > 1 && !self.printed_blank {
            writeln!(self.sink)?;
            self.printed_blank = true;
        }
        Ok(())
    }

    /// When a return can't collapse onto its call's line, re-emit the name
    /// at the return depth (spec §4.4). The call's own stack frame already
    /// carried its qualified name; we recompute defensively in case the
    /// frame is gone (it never is, by construction of `render_return`).
    fn qualified_name_for_return(&self, tracer_id: i64, _depth: i64) -> String {
        self.tracers
            .iter()
            .find(|(id, _)| **id == tracer_id)
            .and_then(|(_, t)| t.last_printed.clone())
            .map(|lp| lp.rsplit_once(':').map(|(n, _)| n.to_string()).unwrap_or(lp))
            .unwrap_or_else(|| "(unknown)".to_string())
    }

    fn render_slow(
        &mut self,
        time_us: i64,
        duration_us: i64,
        nesting: i64,
        mid: i64,
        is_singleton: bool,
        klass_id: i64,
    ) -> Result<()> {
        let qname = self.qualified_name(mid, is_singleton, klass_id);
        let depth = nesting.max(0);

        if let Some(other) = self.open_tracer.take() {
            self.close_open_arglist(other)?;
        }
        if self.line_open {
            writeln!(self.sink)?;
        }
        self.printed_blank = false;

        if self.show_time {
            write!(self.sink, "{}", format_clock(time_us))?;
        }
        write!(self.sink, "{}{}", self.prefix_string.repeat(depth as usize), qname)?;
        if self.show_duration {
            write!(self.sink, "{}", format_duration(duration_us))?;
        }
        writeln!(self.sink)?;
        self.line_open = false;

        if self.max_nesting_seen > 1 && !self.printed_blank {
            writeln!(self.sink)?;
            self.printed_blank = true;
        }
        Ok(())
    }

    fn render_gc_start(&mut self, time_us: i64) -> Result<()> {
        if let Some(other) = self.open_tracer.take() {
            self.close_open_arglist(other)?;
        }
        if self.line_open {
            writeln!(self.sink)?;
        }
        self.printed_blank = false;

        if self.show_time {
            write!(self.sink, "{}", format_clock(time_us))?;
        }
        write!(
            self.sink,
            "{}garbage_collect",
            self.prefix_string.repeat(self.nesting.max(0) as usize)
        )?;
        self.line_open = true;
        self.gc_start_us = Some(time_us);
        Ok(())
    }

    fn render_gc_end(&mut self, time_us: i64) -> Result<()> {
        let start = self.gc_start_us.take().unwrap_or(time_us);
        let duration_us = time_us - start;
        write!(self.sink, "{}", format_duration(duration_us))?;
        writeln!(self.sink)?;
        self.line_open = false;
        self.printed_blank = false;
        Ok(())
    }

    fn render_gc(&mut self, time_us: i64) -> Result<()> {
        if self.gc_start_us.is_some() {
            // A mark tick while a bracket is already open: absorbed.
            return Ok(());
        }
        if let Some(other) = self.open_tracer.take() {
            self.close_open_arglist(other)?;
        }
        if self.line_open {
            writeln!(self.sink)?;
        }
        if self.show_time {
            write!(self.sink, "{}", format_clock(time_us))?;
        }
        write!(
            self.sink,
            "{}garbage_collect",
            self.prefix_string.repeat(self.last_nesting.max(0) as usize)
        )?;
        writeln!(self.sink)?;
        self.line_open = false;
        self.printed_blank = false;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }
}

fn format_clock(time_us: i64) -> String {
    const US_PER_DAY: i64 = 86_400_000_000;
    let total_us = time_us.rem_euclid(US_PER_DAY);
    let us = total_us % 1_000_000;
    let total_secs = total_us / 1_000_000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = (total_secs / 3600) % 24;
    format!("{:02}:{:02}:{:02}.{:06} ", h, m, s, us)
}

fn format_duration(duration_us: i64) -> String {
    let secs = duration_us / 1_000_000;
    let frac = (duration_us % 1_000_000).abs();
    format!(" <{}.{:06}>", secs, frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::value::WireValue;
    use event::parse;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    // SAFETY: tests are single-threaded; Session requires Send only so a
    // real transport's OS file descriptors can cross thread boundaries in
    // production, which a test buffer never needs to do.
    unsafe impl Send for SharedBuf {}

    fn new_session(buf: &SharedBuf, show_duration: bool, show_time: bool) -> Session {
        Session::new(4242, 1000, Box::new(buf.clone()), show_time, show_duration, "  ".into())
    }

    fn ev(tuple: Vec<WireValue>) -> Event {
        parse(&WireValue::Array(tuple)).unwrap()
    }

    fn text(buf: &SharedBuf) -> String {
        String::from_utf8(buf.0.borrow().clone()).unwrap()
    }

    #[test]
    fn scenario_attach_handshake() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        s.handle(ev(vec![WireValue::Str("attached".into()), WireValue::Int(4242)]))
            .unwrap();
        assert!(s.attached);
    }

    #[test]
    fn scenario_ownership_collision_is_fatal() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        let err = s
            .handle(ev(vec![WireValue::Str("attached".into()), WireValue::Int(9999)]))
            .unwrap_err();
        match err {
            Error::AlreadyTraced { other, mine, .. } => {
                assert_eq!(other, 9999);
                assert_eq!(mine, 4242);
            }
            _ => panic!("expected AlreadyTraced"),
        }
    }

    #[test]
    fn scenario_single_traced_call_collapsed_form() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        s.handle(ev(vec![WireValue::Str("klass".into()), WireValue::Int(7), WireValue::Str("String".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("mid".into()), WireValue::Int(3), WireValue::Str("gsub".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("add".into()), WireValue::Int(1), WireValue::Str("String#gsub".into())])).unwrap();
        s.handle(ev(vec![
            WireValue::Str("call".into()),
            WireValue::Int(1_700_000_000_000_000),
            WireValue::Int(1),
            WireValue::Int(3),
            WireValue::Bool(false),
            WireValue::Int(7),
        ]))
        .unwrap();
        s.handle(ev(vec![
            WireValue::Str("return".into()),
            WireValue::Int(1_700_000_000_012_500),
            WireValue::Int(1),
        ]))
        .unwrap();

        assert_eq!(text(&buf), "String#gsub <0.012500>\n");
    }

    #[test]
    fn scenario_nested_call_with_argument_expression() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        let t0: i64 = 5_000_000_000;
        s.handle(ev(vec![WireValue::Str("klass".into()), WireValue::Int(7), WireValue::Str("Foo".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("mid".into()), WireValue::Int(9), WireValue::Str("bar".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("add".into()), WireValue::Int(2), WireValue::Str("Foo#bar(x)".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("newexpr".into()), WireValue::Int(2), WireValue::Int(0), WireValue::Str("x".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("exprval".into()), WireValue::Int(2), WireValue::Int(0), WireValue::Str("42".into())])).unwrap();
        s.handle(ev(vec![
            WireValue::Str("call".into()),
            WireValue::Int(t0),
            WireValue::Int(2),
            WireValue::Int(9),
            WireValue::Bool(false),
            WireValue::Int(7),
        ]))
        .unwrap();
        s.handle(ev(vec![
            WireValue::Str("return".into()),
            WireValue::Int(t0 + 1_000_000),
            WireValue::Int(2),
        ]))
        .unwrap();

        assert_eq!(text(&buf), "Foo#bar(x=42) <1.000000>\n");
    }

    #[test]
    fn scenario_slow_call_at_nesting_two() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        s.max_nesting_seen = 2; // as if reached by earlier calls in the session
        s.handle(ev(vec![WireValue::Str("klass".into()), WireValue::Int(7), WireValue::Str("Foo".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("mid".into()), WireValue::Int(9), WireValue::Str("bar".into())])).unwrap();
        s.handle(ev(vec![
            WireValue::Str("slow".into()),
            WireValue::Int(1_000_000),
            WireValue::Int(250_000),
            WireValue::Int(2),
            WireValue::Int(9),
            WireValue::Bool(false),
            WireValue::Int(7),
        ]))
        .unwrap();

        assert_eq!(text(&buf), "    Foo#bar <0.250000>\n\n");
    }

    #[test]
    fn scenario_gc_bracket() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        s.handle(ev(vec![WireValue::Str("gc_start".into()), WireValue::Int(0)])).unwrap();
        s.handle(ev(vec![WireValue::Str("gc_end".into()), WireValue::Int(5_000_000)])).unwrap();
        assert_eq!(text(&buf), "garbage_collect <5.000000>\n");
    }

    #[test]
    fn return_at_nesting_zero_is_absorbed_without_output() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, true, false);
        s.handle(ev(vec![WireValue::Str("return".into()), WireValue::Int(0), WireValue::Int(1)]))
            .unwrap();
        assert_eq!(text(&buf), "");
        assert_eq!(s.nesting, 0);
    }

    #[test]
    fn gc_tick_with_no_open_bracket_renders_standalone_line() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, false, false);
        s.handle(ev(vec![WireValue::Str("gc".into()), WireValue::Int(0)])).unwrap();
        assert_eq!(text(&buf), "garbage_collect\n");
    }

    #[test]
    fn gc_tick_with_open_bracket_is_absorbed() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, false, false);
        s.handle(ev(vec![WireValue::Str("gc_start".into()), WireValue::Int(0)])).unwrap();
        s.handle(ev(vec![WireValue::Str("gc".into()), WireValue::Int(1)])).unwrap();
        // still open — no extra garbage_collect line, no newline yet
        assert_eq!(text(&buf), "garbage_collect");
    }

    #[test]
    fn no_two_consecutive_blank_lines() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, false, false);
        s.max_nesting_seen = 2;
        for t in 0..3i64 {
            s.handle(ev(vec![
                WireValue::Str("call".into()),
                WireValue::Int(t * 10),
                WireValue::Int(1),
                WireValue::Int(99),
                WireValue::Bool(false),
                WireValue::Int(1),
            ]))
            .unwrap();
            s.handle(ev(vec![
                WireValue::Str("return".into()),
                WireValue::Int(t * 10 + 1),
                WireValue::Int(1),
            ]))
            .unwrap();
        }
        let out = text(&buf);
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn different_tracer_call_closes_previous_open_arglist() {
        let buf = SharedBuf::default();
        let mut s = new_session(&buf, false, false);
        s.handle(ev(vec![WireValue::Str("mid".into()), WireValue::Int(1), WireValue::Str("a".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("mid".into()), WireValue::Int(2), WireValue::Str("b".into())])).unwrap();
        s.handle(ev(vec![
            WireValue::Str("call".into()),
            WireValue::Int(0),
            WireValue::Int(10),
            WireValue::Int(1),
            WireValue::Bool(false),
            WireValue::Int(1),
        ]))
        .unwrap();
        s.handle(ev(vec![WireValue::Str("newexpr".into()), WireValue::Int(10), WireValue::Int(0), WireValue::Str("x".into())])).unwrap();
        s.handle(ev(vec![WireValue::Str("exprval".into()), WireValue::Int(10), WireValue::Int(0), WireValue::Str("1".into())])).unwrap();
        // a second tracer's call arrives before tracer 10 returns
        s.handle(ev(vec![
            WireValue::Str("call".into()),
            WireValue::Int(1),
            WireValue::Int(20),
            WireValue::Int(2),
            WireValue::Bool(false),
            WireValue::Int(1),
        ]))
        .unwrap();

        let out = text(&buf);
        assert!(out.contains("(x=1)"));
    }
}
