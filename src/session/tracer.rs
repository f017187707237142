//! Per-tracer state (spec §3 "Tracer record").

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Tracer {
    pub query: String,
    /// `(start_time_us, qualified_name)` for each in-flight call on this
    /// tracer.
    pub call_stack: Vec<(i64, String)>,
    /// `expr_id -> source text`, populated by `newexpr`.
    pub expressions: HashMap<i64, String>,
    /// Whether a `(` has been emitted (to the sink, or buffered awaiting a
    /// call not yet rendered) without a matching `)`.
    pub arglist_open: bool,
    /// Accumulated `name=value` text not yet flushed to the sink, for
    /// `exprval`s that arrive before this tracer's `call` has rendered.
    pub pending_arglist: String,
    /// `"<name>:<depth>"` of the most recently printed call for this
    /// tracer, used to collapse leaf call/return pairs onto one line.
    pub last_printed: Option<String>,
}

impl Tracer {
    pub fn new(query: String) -> Tracer {
        Tracer {
            query,
            ..Default::default()
        }
    }
}

/// A table of tracers keyed by id, replacing the source's auto-vivifying
/// map (spec §9): lookups that should create a default record on miss go
/// through [`TracerTable::get_or_insert`] explicitly.
#[derive(Debug, Default)]
pub struct TracerTable {
    tracers: HashMap<i64, Tracer>,
}

impl TracerTable {
    pub fn get_or_insert(&mut self, id: i64) -> &mut Tracer {
        self.tracers.entry(id).or_insert_with(|| Tracer::new(String::new()))
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut Tracer> {
        self.tracers.get_mut(&id)
    }

    pub fn insert(&mut self, id: i64, tracer: Tracer) {
        self.tracers.insert(id, tracer);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Tracer)> {
        self.tracers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_creates_a_default_record_on_miss() {
        let mut table = TracerTable::default();
        let t = table.get_or_insert(7);
        assert!(t.call_stack.is_empty());
        assert!(!t.arglist_open);
    }
}
