//! Format Guard
//!
//! Static screening of string-format patterns before they reach the
//! validation engine. The check never executes the candidate; it walks the
//! parsed pattern and looks for the shapes that make a backtracking matcher
//! go exponential:
//!
//! 1. A variable-count quantifier nested inside an unbounded quantifier where
//!    the inner repeated atom can match the same character the outer
//!    repetition starts with, e.g. `(a+)+`, `(\w+\s?)*`.
//! 2. An unbounded quantifier over an alternation whose branches can begin
//!    with the same character, e.g. `(a|ab)*`, `(\w|\d)+`.
//!
//! The analysis over-approximates character sets, so some safe patterns are
//! rejected. Rejected (and unparsable) patterns are replaced by
//! [`PERMISSIVE_PATTERN`] and a warning is logged.

use regex::Regex;
use regex_syntax::ast::{
    self, Ast, ClassPerl, ClassPerlKind, ClassSet, ClassSetItem, RepetitionKind, RepetitionRange,
};
use tracing::{debug, warn};

/// Catch-all pattern installed in place of a rejected one
pub const PERMISSIVE_PATTERN: &str = "(?s)^.*$";

/// Bounded repetitions above this many iterations are treated as unbounded
const REPETITION_BOUND_LIMIT: u32 = 10;

/// Outcome of the static analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Unsafe { reason: String },
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }
}

/// A format that passed through the guard, ready for installation
#[derive(Debug, Clone)]
pub struct GuardedFormat {
    /// Format name (the value used in a schema's `format` keyword)
    pub name: String,
    /// Pattern the caller asked for
    pub requested: String,
    /// Pattern actually installed
    pub installed: String,
    /// Analysis verdict for `requested`
    pub verdict: Verdict,
    /// `None` when the permissive fallback is installed
    regex: Option<Regex>,
}

impl GuardedFormat {
    /// Whether the requested pattern was replaced by the fallback
    pub fn substituted(&self) -> bool {
        self.installed != self.requested
    }

    /// Check a string against the installed pattern
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.as_ref().map_or(true, |regex| regex.is_match(value))
    }
}

/// Stateless gate in front of format installation
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatGuard;

impl FormatGuard {
    pub fn new() -> Self {
        Self
    }

    /// Analyze `pattern` and produce the format that should be installed
    /// under `name`: the pattern itself when safe, the permissive fallback
    /// otherwise.
    pub fn check(&self, name: &str, pattern: &str) -> GuardedFormat {
        let accepted = match analyze(pattern) {
            Verdict::Safe => {
                Regex::new(pattern).map_err(|e| format!("pattern does not compile: {e}"))
            }
            Verdict::Unsafe { reason } => Err(reason),
        };

        match accepted {
            Ok(regex) => {
                debug!(format = %name, pattern = %pattern, "Format pattern accepted");
                GuardedFormat {
                    name: name.to_string(),
                    requested: pattern.to_string(),
                    installed: pattern.to_string(),
                    verdict: Verdict::Safe,
                    regex: Some(regex),
                }
            }
            Err(reason) => {
                warn!(
                    format = %name,
                    pattern = %pattern,
                    reason = %reason,
                    "Unsafe format pattern replaced with permissive fallback"
                );
                GuardedFormat {
                    name: name.to_string(),
                    requested: pattern.to_string(),
                    installed: PERMISSIVE_PATTERN.to_string(),
                    verdict: Verdict::Unsafe { reason },
                    regex: None,
                }
            }
        }
    }
}

/// Run the static analysis on a pattern
pub fn analyze(pattern: &str) -> Verdict {
    let parsed = match ast::parse::Parser::new().parse(pattern) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Verdict::Unsafe {
                reason: format!("unsupported pattern syntax: {}", e.kind()),
            }
        }
    };

    match inspect(&parsed) {
        Ok(()) => Verdict::Safe,
        Err(reason) => Verdict::Unsafe { reason },
    }
}

fn inspect(node: &Ast) -> Result<(), String> {
    match node {
        Ast::Repetition(rep) => {
            if is_unbounded(&rep.op.kind) {
                check_repeated_body(&rep.ast)?;
            }
            inspect(&rep.ast)
        }
        Ast::Group(group) => inspect(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().try_for_each(inspect),
        Ast::Concat(concat) => concat.asts.iter().try_for_each(inspect),
        _ => Ok(()),
    }
}

/// Checks for the body of an unbounded repetition
fn check_repeated_body(body: &Ast) -> Result<(), String> {
    let (body_first, _) = first_set(body);

    let mut nested = Vec::new();
    collect_variable_repetitions(body, &mut nested);
    for inner in nested {
        let (inner_first, _) = first_set(inner);
        if inner_first.overlaps(&body_first) {
            return Err(
                "nested quantifier over a character class overlapping its enclosing repetition"
                    .to_string(),
            );
        }
    }

    if let Some(branches) = top_alternation(body) {
        let firsts: Vec<(CharSet, bool)> = branches.iter().map(first_set).collect();
        for (i, (a, a_nullable)) in firsts.iter().enumerate() {
            if *a_nullable {
                return Err("repeated alternation with an empty branch".to_string());
            }
            for (b, _) in &firsts[i + 1..] {
                if a.overlaps(b) {
                    return Err("repeated alternation with overlapping branches".to_string());
                }
            }
        }
    }

    Ok(())
}

/// Bodies of every variable-count repetition under `node`
fn collect_variable_repetitions<'a>(node: &'a Ast, out: &mut Vec<&'a Ast>) {
    match node {
        Ast::Repetition(rep) => {
            if is_variable(&rep.op.kind) {
                out.push(&rep.ast);
            }
            collect_variable_repetitions(&rep.ast, out);
        }
        Ast::Group(group) => collect_variable_repetitions(&group.ast, out),
        Ast::Alternation(alt) => alt
            .asts
            .iter()
            .for_each(|a| collect_variable_repetitions(a, out)),
        Ast::Concat(concat) => concat
            .asts
            .iter()
            .for_each(|a| collect_variable_repetitions(a, out)),
        _ => {}
    }
}

fn top_alternation(node: &Ast) -> Option<&[Ast]> {
    match node {
        Ast::Group(group) => top_alternation(&group.ast),
        Ast::Alternation(alt) => Some(alt.asts.as_slice()),
        _ => None,
    }
}

fn is_unbounded(kind: &RepetitionKind) -> bool {
    match kind {
        RepetitionKind::ZeroOrMore | RepetitionKind::OneOrMore => true,
        RepetitionKind::ZeroOrOne => false,
        RepetitionKind::Range(RepetitionRange::AtLeast(_)) => true,
        RepetitionKind::Range(RepetitionRange::Exactly(n)) => *n > REPETITION_BOUND_LIMIT,
        RepetitionKind::Range(RepetitionRange::Bounded(_, max)) => *max > REPETITION_BOUND_LIMIT,
    }
}

fn is_variable(kind: &RepetitionKind) -> bool {
    match kind {
        RepetitionKind::Range(RepetitionRange::Exactly(_)) => false,
        RepetitionKind::Range(RepetitionRange::Bounded(min, max)) => min != max,
        _ => true,
    }
}

/// Over-approximated set of characters
#[derive(Debug, Clone, Default)]
struct CharSet {
    any: bool,
    ranges: Vec<(char, char)>,
    /// Some non-ASCII characters (Unicode-aware Perl classes)
    non_ascii: bool,
}

impl CharSet {
    fn any() -> Self {
        Self {
            any: true,
            ..Self::default()
        }
    }

    fn literal(c: char) -> Self {
        let mut set = Self::default();
        set.push(c, c);
        // Case-insensitive flags are not tracked, so both cases count.
        for other in c.to_lowercase().chain(c.to_uppercase()) {
            if other != c {
                set.push(other, other);
            }
        }
        set
    }

    fn push(&mut self, start: char, end: char) {
        self.ranges.push((start.min(end), start.max(end)));
    }

    fn union(&mut self, other: CharSet) {
        self.any |= other.any;
        self.non_ascii |= other.non_ascii;
        self.ranges.extend(other.ranges);
    }

    fn is_empty(&self) -> bool {
        !self.any && !self.non_ascii && self.ranges.is_empty()
    }

    fn has_non_ascii_range(&self) -> bool {
        self.ranges.iter().any(|(_, end)| !end.is_ascii())
    }

    fn overlaps(&self, other: &CharSet) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.any || other.any {
            return true;
        }
        if (self.non_ascii && (other.non_ascii || other.has_non_ascii_range()))
            || (other.non_ascii && self.has_non_ascii_range())
        {
            return true;
        }
        self.ranges.iter().any(|(a_start, a_end)| {
            other
                .ranges
                .iter()
                .any(|(b_start, b_end)| a_start <= b_end && b_start <= a_end)
        })
    }
}

/// Characters a match of `node` can begin with, and whether it can match empty
fn first_set(node: &Ast) -> (CharSet, bool) {
    match node {
        Ast::Empty(_) | Ast::Flags(_) | Ast::Assertion(_) => (CharSet::default(), true),
        Ast::Literal(lit) => (CharSet::literal(lit.c), false),
        Ast::Dot(_) | Ast::ClassUnicode(_) => (CharSet::any(), false),
        Ast::ClassPerl(perl) => (perl_set(perl), false),
        Ast::ClassBracketed(class) => {
            if class.negated {
                (CharSet::any(), false)
            } else {
                (class_set(&class.kind), false)
            }
        }
        Ast::Repetition(rep) => {
            let (set, nullable) = first_set(&rep.ast);
            let optional = match &rep.op.kind {
                RepetitionKind::ZeroOrOne | RepetitionKind::ZeroOrMore => true,
                RepetitionKind::OneOrMore => false,
                RepetitionKind::Range(RepetitionRange::Exactly(n))
                | RepetitionKind::Range(RepetitionRange::AtLeast(n))
                | RepetitionKind::Range(RepetitionRange::Bounded(n, _)) => *n == 0,
            };
            (set, nullable || optional)
        }
        Ast::Group(group) => first_set(&group.ast),
        Ast::Alternation(alt) => {
            let mut set = CharSet::default();
            let mut nullable = false;
            for branch in &alt.asts {
                let (branch_set, branch_nullable) = first_set(branch);
                set.union(branch_set);
                nullable |= branch_nullable;
            }
            (set, nullable)
        }
        Ast::Concat(concat) => {
            let mut set = CharSet::default();
            for part in &concat.asts {
                let (part_set, part_nullable) = first_set(part);
                set.union(part_set);
                if !part_nullable {
                    return (set, false);
                }
            }
            (set, true)
        }
        #[allow(unreachable_patterns)]
        _ => (CharSet::any(), false),
    }
}

fn perl_set(perl: &ClassPerl) -> CharSet {
    if perl.negated {
        return CharSet::any();
    }
    let mut set = CharSet {
        non_ascii: true,
        ..CharSet::default()
    };
    match perl.kind {
        ClassPerlKind::Digit => set.push('0', '9'),
        ClassPerlKind::Space => {
            set.push('\t', '\r');
            set.push(' ', ' ');
        }
        ClassPerlKind::Word => {
            set.push('0', '9');
            set.push('A', 'Z');
            set.push('a', 'z');
            set.push('_', '_');
        }
    }
    set
}

fn class_set(kind: &ClassSet) -> CharSet {
    match kind {
        ClassSet::Item(item) => class_item_set(item),
        ClassSet::BinaryOp(_) => CharSet::any(),
    }
}

fn class_item_set(item: &ClassSetItem) -> CharSet {
    match item {
        ClassSetItem::Empty(_) => CharSet::default(),
        ClassSetItem::Literal(lit) => CharSet::literal(lit.c),
        ClassSetItem::Range(range) => {
            let mut set = CharSet::default();
            set.push(range.start.c, range.end.c);
            set
        }
        ClassSetItem::Perl(perl) => perl_set(perl),
        ClassSetItem::Bracketed(inner) => {
            if inner.negated {
                CharSet::any()
            } else {
                class_set(&inner.kind)
            }
        }
        ClassSetItem::Union(union) => {
            let mut set = CharSet::default();
            for item in &union.items {
                set.union(class_item_set(item));
            }
            set
        }
        ClassSetItem::Ascii(_) | ClassSetItem::Unicode(_) => CharSet::any(),
        #[allow(unreachable_patterns)]
        _ => CharSet::any(),
    }
}
