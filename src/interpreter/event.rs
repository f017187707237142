//! Inbound event set (spec §4.4), parsed out of a decoded [`WireValue`].

use crate::error::{Error, Result};
use crate::wire::value::WireValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Attached { tracer_pid: i64 },
    Detached { tracer_pid: i64 },
    Mid { id: i64, name: String },
    Klass { id: i64, name: String },
    Add { tracer_id: i64, query: String },
    NewExpr { tracer_id: i64, expr_id: i64, expr: String },
    ExprVal { tracer_id: i64, expr_id: i64, value: String },
    Call { time_us: i64, tracer_id: i64, mid: i64, is_singleton: bool, klass_id: i64 },
    Return { time_us: i64, tracer_id: i64 },
    Slow {
        time_us: i64,
        duration_us: i64,
        nesting: i64,
        mid: i64,
        is_singleton: bool,
        klass_id: i64,
    },
    GcStart { time_us: i64 },
    GcEnd { time_us: i64 },
    Gc { time_us: i64 },
    DuringGc,
    /// Reply to the `fork` command (spec §4.3's "expect `forked pid`"). Not
    /// listed in spec §4.4's event table, which only enumerates the
    /// streaming trace events; folded in here since it arrives on the same
    /// `qin` channel as everything else.
    Forked { pid: i64 },
    /// Reply to the `eval` command ("expect `evaled result_string`").
    Evaled { result: String },
    Unknown { tag: String, payload: Vec<WireValue> },
}

fn int_at(args: &[WireValue], i: usize, what: &str) -> Result<i64> {
    args.get(i)
        .and_then(WireValue::as_i64)
        .ok_or_else(|| Error::MalformedEvent(format!("{}: missing/invalid integer at arg {}", what, i)))
}

fn str_at(args: &[WireValue], i: usize, what: &str) -> Result<String> {
    args.get(i)
        .and_then(WireValue::as_str)
        .map(|s| s.to_owned())
        .ok_or_else(|| Error::MalformedEvent(format!("{}: missing/invalid string at arg {}", what, i)))
}

fn bool_at(args: &[WireValue], i: usize, what: &str) -> Result<bool> {
    args.get(i)
        .and_then(WireValue::as_bool)
        .ok_or_else(|| Error::MalformedEvent(format!("{}: missing/invalid bool at arg {}", what, i)))
}

/// Parse one decoded message body into an [`Event`]. Unrecognized tags are
/// not an error: spec §4.4 treats them as `Event::Unknown`, rendered as a
/// diagnostic but not fatal. A recognized tag with the wrong shape of
/// arguments *is* a parse failure (`Error::MalformedEvent`) — spec §4.4's
/// "Failure semantics" distinguishes "unknown event" from "malformed known
/// event".
pub fn parse(value: &WireValue) -> Result<Event> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::MalformedEvent("message body is not an array".into()))?;
    let tag = items
        .first()
        .and_then(WireValue::as_str)
        .ok_or_else(|| Error::MalformedEvent("message body has no string tag".into()))?;
    let args = &items[1.min(items.len())..];

    let event = match tag {
        "attached" => Event::Attached {
            tracer_pid: int_at(args, 0, "attached")?,
        },
        "detached" => Event::Detached {
            tracer_pid: int_at(args, 0, "detached")?,
        },
        "mid" => Event::Mid {
            id: int_at(args, 0, "mid")?,
            name: str_at(args, 1, "mid")?,
        },
        "klass" => Event::Klass {
            id: int_at(args, 0, "klass")?,
            name: str_at(args, 1, "klass")?,
        },
        "add" => Event::Add {
            tracer_id: int_at(args, 0, "add")?,
            query: str_at(args, 1, "add")?,
        },
        "newexpr" => Event::NewExpr {
            tracer_id: int_at(args, 0, "newexpr")?,
            expr_id: int_at(args, 1, "newexpr")?,
            expr: str_at(args, 2, "newexpr")?,
        },
        "exprval" => Event::ExprVal {
            tracer_id: int_at(args, 0, "exprval")?,
            expr_id: int_at(args, 1, "exprval")?,
            value: str_at(args, 2, "exprval")?,
        },
        "call" | "ccall" => Event::Call {
            time_us: int_at(args, 0, tag)?,
            tracer_id: int_at(args, 1, tag)?,
            mid: int_at(args, 2, tag)?,
            is_singleton: bool_at(args, 3, tag)?,
            klass_id: int_at(args, 4, tag)?,
        },
        "return" | "creturn" => Event::Return {
            time_us: int_at(args, 0, tag)?,
            tracer_id: int_at(args, 1, tag)?,
        },
        "slow" | "cslow" => Event::Slow {
            time_us: int_at(args, 0, tag)?,
            duration_us: int_at(args, 1, tag)?,
            nesting: int_at(args, 2, tag)?,
            mid: int_at(args, 3, tag)?,
            is_singleton: bool_at(args, 4, tag)?,
            klass_id: int_at(args, 5, tag)?,
        },
        "gc_start" => Event::GcStart {
            time_us: int_at(args, 0, "gc_start")?,
        },
        "gc_end" => Event::GcEnd {
            time_us: int_at(args, 0, "gc_end")?,
        },
        "gc" => Event::Gc {
            time_us: int_at(args, 0, "gc")?,
        },
        "during_gc" => Event::DuringGc,
        "forked" => Event::Forked {
            pid: int_at(args, 0, "forked")?,
        },
        "evaled" => Event::Evaled {
            result: str_at(args, 0, "evaled")?,
        },
        other => Event::Unknown {
            tag: other.to_owned(),
            payload: args.to_vec(),
        },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attached() {
        let v = WireValue::Array(vec![WireValue::Str("attached".into()), WireValue::Int(4242)]);
        assert_eq!(parse(&v).unwrap(), Event::Attached { tracer_pid: 4242 });
    }

    #[test]
    fn parses_call_with_both_tag_spellings() {
        let v = WireValue::Array(vec![
            WireValue::Str("call".into()),
            WireValue::Int(1),
            WireValue::Int(2),
            WireValue::Int(3),
            WireValue::Bool(false),
            WireValue::Int(4),
        ]);
        assert!(matches!(parse(&v).unwrap(), Event::Call { .. }));

        let v2 = WireValue::Array(vec![
            WireValue::Str("ccall".into()),
            WireValue::Int(1),
            WireValue::Int(2),
            WireValue::Int(3),
            WireValue::Bool(true),
            WireValue::Int(4),
        ]);
        assert!(matches!(parse(&v2).unwrap(), Event::Call { is_singleton: true, .. }));
    }

    #[test]
    fn unrecognized_tag_is_unknown_not_an_error() {
        let v = WireValue::Array(vec![WireValue::Str("frobnicate".into())]);
        assert!(matches!(parse(&v).unwrap(), Event::Unknown { .. }));
    }

    #[test]
    fn parses_forked_and_evaled_replies() {
        let v = WireValue::Array(vec![WireValue::Str("forked".into()), WireValue::Int(5555)]);
        assert_eq!(parse(&v).unwrap(), Event::Forked { pid: 5555 });

        let v2 = WireValue::Array(vec![WireValue::Str("evaled".into()), WireValue::Str("3".into())]);
        assert_eq!(parse(&v2).unwrap(), Event::Evaled { result: "3".into() });
    }

    #[test]
    fn known_tag_with_missing_args_is_malformed() {
        let v = WireValue::Array(vec![WireValue::Str("call".into())]);
        assert!(parse(&v).is_err());
    }
}
