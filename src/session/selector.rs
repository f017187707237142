//! Selector syntax (spec §4.3): parses a user-facing method selector into
//! the bare selector text sent with the `add` command plus the argument
//! expressions split off into subsequent `addexpr` commands.

/// Which methods a selector names, independent of the bare selector text
/// the `add` command actually transmits — kept for validation and tests,
/// not itself part of the wire payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SelectorKind {
    /// Bare name: matches both an instance and a class method of that name.
    Bare,
    /// `Class#method`
    Instance,
    /// `Class.method`
    Class,
    /// `Class#`: every instance method of `Class`.
    AllInstance,
    /// `Class.`: every class method of `Class`.
    AllClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSelector {
    /// The selector text to send as the `add` command's argument, with any
    /// parenthesized expression list already stripped off.
    pub selector: String,
    pub kind: SelectorKind,
    /// Expression texts to send as subsequent `addexpr` commands on the
    /// same tracer, in order.
    pub expressions: Vec<String>,
}

fn classify(selector: &str) -> SelectorKind {
    if let Some(rest) = selector.strip_suffix('#') {
        if !rest.is_empty() {
            return SelectorKind::AllInstance;
        }
    }
    if let Some(rest) = selector.strip_suffix('.') {
        if !rest.is_empty() {
            return SelectorKind::AllClass;
        }
    }
    if selector.contains('#') {
        return SelectorKind::Instance;
    }
    if selector.contains('.') {
        return SelectorKind::Class;
    }
    SelectorKind::Bare
}

/// Split `a, b(c, d), e` style lists on every top-level comma. The spec
/// explicitly does not ask for nesting-aware splitting ("respecting no
/// nesting"), so this is a plain split, not a paren-balancing scanner.
fn split_commas(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|s| s.trim().to_string()).collect()
}

/// Prefix an instance-variable-looking expression with a leading space
/// unless it is the trivial `@name` form, so the target evaluates it as an
/// expression instead of reading the bare ivar (spec §4.3).
fn normalize_expression(expr: &str) -> String {
    let trimmed_start = expr.trim_start();
    if !trimmed_start.starts_with('@') {
        return expr.to_string();
    }
    if is_trivial_ivar(trimmed_start) {
        expr.to_string()
    } else {
        format!(" {}", expr)
    }
}

fn is_trivial_ivar(s: &str) -> bool {
    let mut chars = s.chars();
    if chars.next() != Some('@') {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    if rest.is_empty() {
        return false;
    }
    let first = rest[0];
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    rest.iter().all(|&c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a user-facing selector, splitting off an optional `(expr, ...)`
/// argument list.
pub fn parse(input: &str) -> ParsedSelector {
    let (selector_part, expressions) = match input.find('(') {
        Some(open) if input.trim_end().ends_with(')') => {
            let close = input.trim_end().len() - 1;
            let inner = &input[open + 1..close];
            (input[..open].to_string(), split_commas(inner))
        }
        _ => (input.to_string(), Vec::new()),
    };

    ParsedSelector {
        kind: classify(&selector_part),
        selector: selector_part,
        expressions: expressions.iter().map(|e| normalize_expression(e)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_matches_both_kinds() {
        let p = parse("gsub");
        assert_eq!(p.selector, "gsub");
        assert_eq!(p.kind, SelectorKind::Bare);
        assert!(p.expressions.is_empty());
    }

    #[test]
    fn instance_method_selector() {
        let p = parse("String#gsub");
        assert_eq!(p.kind, SelectorKind::Instance);
        assert_eq!(p.selector, "String#gsub");
    }

    #[test]
    fn class_method_selector() {
        let p = parse("String.try_convert");
        assert_eq!(p.kind, SelectorKind::Class);
    }

    #[test]
    fn all_instance_methods_of_class() {
        let p = parse("Foo#");
        assert_eq!(p.kind, SelectorKind::AllInstance);
    }

    #[test]
    fn all_class_methods_of_class() {
        let p = parse("Foo.");
        assert_eq!(p.kind, SelectorKind::AllClass);
    }

    #[test]
    fn splits_argument_expressions_on_commas() {
        let p = parse("Foo#bar(x, y.z, 1 + 2)");
        assert_eq!(p.selector, "Foo#bar");
        assert_eq!(p.expressions, vec!["x", "y.z", "1 + 2"]);
    }

    #[test]
    fn trivial_ivar_expression_is_untouched() {
        let p = parse("Foo#bar(@name)");
        assert_eq!(p.expressions, vec!["@name"]);
    }

    #[test]
    fn non_trivial_ivar_expression_gets_space_prefixed() {
        let p = parse("Foo#bar(@name.upcase)");
        assert_eq!(p.expressions, vec![" @name.upcase"]);
    }

    #[test]
    fn no_parens_means_no_expressions() {
        let p = parse("Foo#bar");
        assert!(p.expressions.is_empty());
    }
}
