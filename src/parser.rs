//! Scanner for the `@Name(argument)` command micro-syntax embedded in
//! assistant answers.
//!
//! The grammar is a single nesting construct: a command starts at `@`, its
//! name runs up to the first `(`, and its argument is everything up to the
//! *matching* `)` tracked with a parenthesis-depth counter, so arguments may
//! contain balanced nested parens (code, structured data). There is no escape
//! syntax; an argument with unbalanced parens never terminates and the
//! occurrence is dropped (or rejected, depending on the configured policy).

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::AppError;

/// One parsed `@Name(argument)` span found in raw text.
///
/// `start` is the byte index of the `@`, `end` the byte index of the matching
/// `)`. Immutable once parsed; spans are non-decreasing in `start` and never
/// overlap (a new `@` cannot open while an occurrence is being scanned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Occurrence {
    pub name: String,
    pub query: String,
    pub start: usize,
    pub end: usize,
}

/// What to do with a command whose argument scan never finds its `)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnterminatedCommand {
    /// Drop the occurrence silently (the original behavior).
    #[default]
    Discard,
    /// Reject the whole parse with [`AppError::UnterminatedCommand`].
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub on_unterminated: UnterminatedCommand,
}

/// Parse all command occurrences out of `text`, discarding unterminated
/// commands. Pure and deterministic; never fails.
pub fn parse(text: &str) -> Vec<Occurrence> {
    match parse_with(text, ParseOptions::default()) {
        Ok(occurrences) => occurrences,
        // Unreachable with the Discard policy; kept total rather than panicking.
        Err(_) => Vec::new(),
    }
}

/// Parse with an explicit unterminated-command policy.
///
/// Single left-to-right scan, constant extra state. A bare `@` (or `@name`
/// with no `(`) never opened an argument scan, so it is ignored under both
/// policies; only an unclosed argument counts as unterminated.
pub fn parse_with(text: &str, options: ParseOptions) -> Result<Vec<Occurrence>, AppError> {
    let mut occurrences = Vec::new();
    let mut name = String::new();
    let mut query = String::new();
    let mut start = 0usize;
    let mut in_name = false;
    let mut in_query = false;
    let mut depth = 0u32;

    for (i, ch) in text.char_indices() {
        if ch == '@' && !in_name && !in_query {
            start = i;
            in_name = true;
        } else if in_name && ch == '(' {
            in_name = false;
            in_query = true;
            depth = 1;
        } else if in_query && ch == '(' {
            depth += 1;
            query.push(ch);
        } else if in_query && ch == ')' {
            depth -= 1;
            if depth == 0 {
                in_query = false;
                occurrences.push(Occurrence {
                    name: std::mem::take(&mut name),
                    query: std::mem::take(&mut query),
                    start,
                    end: i,
                });
            } else {
                query.push(ch);
            }
        } else if in_name {
            // Whitespace and any further `@` are part of the name verbatim;
            // trimming is a handler's responsibility, not the parser's.
            name.push(ch);
        } else if in_query {
            query.push(ch);
        }
    }

    if in_query && options.on_unterminated == UnterminatedCommand::Error {
        return Err(AppError::UnterminatedCommand { start });
    }

    Ok(occurrences)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_yields_nothing() {
        assert!(parse("no commands here, just prose.").is_empty());
    }

    #[test]
    fn span_exactness_single_occurrence() {
        let text = "see @Cmd(arg) now";
        let occurrences = parse(text);
        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert_eq!(occ.name, "Cmd");
        assert_eq!(occ.query, "arg");
        assert_eq!(occ.start, text.find('@').unwrap());
        assert_eq!(occ.end, text.find(')').unwrap());
    }

    #[test]
    fn nested_parentheses_belong_to_the_argument() {
        let occurrences = parse("@Cmd((a)(b))");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].query, "(a)(b)");
        assert_eq!(occurrences[0].end, 11);
    }

    #[test]
    fn unterminated_command_is_dropped() {
        assert!(parse("@Cmd(abc").is_empty());
    }

    #[test]
    fn unterminated_command_errors_under_opt_in_policy() {
        let options = ParseOptions {
            on_unterminated: UnterminatedCommand::Error,
        };
        let err = parse_with("x @Cmd(abc", options).unwrap_err();
        assert!(matches!(err, AppError::UnterminatedCommand { start: 2 }));
    }

    #[test]
    fn bare_at_sign_yields_nothing_under_both_policies() {
        assert!(parse("email me @ home").is_empty());
        let options = ParseOptions {
            on_unterminated: UnterminatedCommand::Error,
        };
        // No argument scan was opened, so this is not an unterminated command.
        assert!(parse_with("email me @ home", options).unwrap().is_empty());
        assert!(parse_with("@name with no paren", options).unwrap().is_empty());
    }

    #[test]
    fn multiple_occurrences_in_left_to_right_order() {
        let occurrences = parse("x @A(1) y @B(2) z");
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].name, "A");
        assert_eq!(occurrences[1].name, "B");
        assert!(occurrences[0].end < occurrences[1].start);
    }

    #[test]
    fn empty_name_is_syntactically_legal() {
        let occurrences = parse("@(payload)");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].name, "");
        assert_eq!(occurrences[0].query, "payload");
    }

    #[test]
    fn whitespace_is_preserved_verbatim() {
        let occurrences = parse("@JS( () => 1 + 1 )");
        assert_eq!(occurrences[0].query, " () => 1 + 1 ");
    }

    #[test]
    fn at_sign_inside_an_open_name_is_part_of_the_name() {
        let occurrences = parse("@a@b(q)");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].name, "a@b");
    }

    #[test]
    fn spans_are_byte_offsets_in_utf8_text() {
        let text = "héllo @Cmd(π)!";
        let occurrences = parse(text);
        assert_eq!(occurrences.len(), 1);
        let occ = &occurrences[0];
        assert_eq!(&text[occ.start..=occ.end], "@Cmd(π)");
        assert_eq!(occ.query, "π");
    }

    #[test]
    fn command_after_unterminated_command_is_swallowed() {
        // Once an argument scan opens it consumes the rest of the input,
        // including what looks like another command: `@B(` nests one paren
        // deeper, its `)` only brings the depth back to one, and the scan
        // never terminates.
        assert!(parse("@A(never closed @B(2)").is_empty());
    }
}
