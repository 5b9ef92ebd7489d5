//! Splicing substitution results back into answer text.
//!
//! The merge walks the original text with a cursor, alternating literal runs
//! and command segments at the byte spans the records carry. It validates
//! every span against the text before emitting anything: a span that falls
//! outside the text, is inverted, overlaps its predecessor, or cuts a UTF-8
//! boundary means the records no longer describe this text, which is an error
//! rather than a best-effort render.

use serde::Serialize;
use serde_json::Value;
use ts_rs::TS;

use crate::dispatcher::SubstitutionRecord;
use crate::error::AppError;

/// One piece of a merged answer, in document order.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "kind", rename_all = "lowercase")]
#[ts(export)]
pub enum Segment {
    /// A literal run of answer text between commands.
    Text { content: String },
    /// A command occurrence with its substitution record (resolved or not).
    Command { record: SubstitutionRecord },
}

/// Interleave `text` with its substitution records.
///
/// Records may arrive in any order; they are sorted by `start` (stable, so
/// equal starts keep input order and then fail the overlap check
/// deterministically). Zero-length text runs are skipped. The merge itself
/// never re-parses: re-merging text against the same records is idempotent.
pub fn merge(text: &str, records: &[SubstitutionRecord]) -> Result<Vec<Segment>, AppError> {
    let mut ordered: Vec<&SubstitutionRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.start);

    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for record in ordered {
        if record.end >= text.len() || record.start >= record.end || record.start < cursor {
            return Err(AppError::InvalidSpan {
                start: record.start,
                end: record.end,
                len: text.len(),
            });
        }
        // .get() also rejects spans that cut a UTF-8 character in half.
        let Some(run) = text.get(cursor..record.start) else {
            return Err(AppError::InvalidSpan {
                start: record.start,
                end: record.end,
                len: text.len(),
            });
        };
        if !run.is_empty() {
            segments.push(Segment::Text {
                content: run.to_string(),
            });
        }
        segments.push(Segment::Command {
            record: record.clone(),
        });
        cursor = record.end + 1;
    }

    match text.get(cursor..) {
        Some(rest) if !rest.is_empty() => segments.push(Segment::Text {
            content: rest.to_string(),
        }),
        Some(_) => {}
        None => {
            return Err(AppError::InvalidSpan {
                start: cursor,
                end: text.len(),
                len: text.len(),
            })
        }
    }

    Ok(segments)
}

/// Flatten merged segments to plain text, for terminal output and logs.
///
/// Resolved string results are spliced verbatim; non-string results as
/// compact JSON; failed and pending occurrences render as bracketed
/// placeholders naming the command state.
pub fn render_plain(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text { content } => out.push_str(content),
            Segment::Command { record } => match (&record.result, &record.error) {
                (Some(Value::String(s)), _) => out.push_str(s),
                (Some(value), _) => out.push_str(&value.to_string()),
                (None, Some(error)) => {
                    out.push_str(&format!("[failed: {error}]"));
                }
                (None, None) => {
                    out.push_str(&format!("[pending: {}]", record.query));
                }
            },
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn resolved(text: &str, results: &[&str]) -> Vec<SubstitutionRecord> {
        parse(text)
            .iter()
            .zip(results)
            .map(|(occ, result)| {
                let mut record = SubstitutionRecord::pending("test.p", occ);
                record.result = Some(Value::String((*result).to_string()));
                record
            })
            .collect()
    }

    #[test]
    fn text_without_records_round_trips_as_one_run() {
        let segments = merge("just prose", &[]).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(matches!(&segments[0], Segment::Text { content } if content == "just prose"));
    }

    #[test]
    fn interleaves_text_and_command_segments() {
        let text = "see @Cmd(arg) now";
        let records = resolved(text, &["[RESULT]"]);
        let segments = merge(text, &records).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[0], Segment::Text { content } if content == "see "));
        assert!(matches!(&segments[1], Segment::Command { .. }));
        assert!(matches!(&segments[2], Segment::Text { content } if content == " now"));
        assert_eq!(render_plain(&segments), "see [RESULT] now");
    }

    #[test]
    fn adjacent_commands_produce_no_empty_text_runs() {
        let text = "@A(1)@B(2)";
        let records = resolved(text, &["x", "y"]);
        let segments = merge(text, &records).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(render_plain(&segments), "xy");
    }

    #[test]
    fn merge_is_idempotent_over_record_order() {
        let text = "a @A(1) b @B(2) c";
        let mut records = resolved(text, &["x", "y"]);
        records.reverse();
        let first = render_plain(&merge(text, &records).unwrap());
        let second = render_plain(&merge(text, &records).unwrap());
        assert_eq!(first, "a x b y c");
        assert_eq!(first, second);
    }

    #[test]
    fn span_past_end_of_text_is_rejected() {
        let text = "short @Cmd(x)";
        let mut records = resolved(text, &["r"]);
        records[0].end = text.len();
        let err = merge(text, &records).unwrap_err();
        assert!(matches!(err, AppError::InvalidSpan { .. }));
    }

    #[test]
    fn inverted_span_is_rejected() {
        let text = "x @Cmd(y) z";
        let mut records = resolved(text, &["r"]);
        records[0].start = records[0].end;
        assert!(matches!(
            merge(text, &records).unwrap_err(),
            AppError::InvalidSpan { .. }
        ));
    }

    #[test]
    fn overlapping_spans_are_rejected() {
        let text = "aa @A(1) @B(2) zz";
        let mut records = resolved(text, &["x", "y"]);
        // Stretch the first span into the second.
        records[0].end = records[1].start + 1;
        assert!(matches!(
            merge(text, &records).unwrap_err(),
            AppError::InvalidSpan { .. }
        ));
    }

    #[test]
    fn span_cutting_a_utf8_boundary_is_rejected() {
        let text = "héllo @Cmd(x) done";
        let mut records = resolved(text, &["r"]);
        // 'é' occupies bytes 1..3; starting inside it is not a char boundary.
        records[0].start = 2;
        assert!(matches!(
            merge(text, &records).unwrap_err(),
            AppError::InvalidSpan { .. }
        ));
    }

    #[test]
    fn pending_and_failed_records_render_as_placeholders() {
        let text = "q: @A(one) @B(two)";
        let occurrences = parse(text);
        let mut records: Vec<_> = occurrences
            .iter()
            .map(|o| SubstitutionRecord::pending("test.p", o))
            .collect();
        records[1].error = Some("boom".to_string());
        let rendered = render_plain(&merge(text, &records).unwrap());
        assert_eq!(rendered, "q: [pending: one] [failed: boom]");
    }

    #[test]
    fn non_string_results_render_as_json() {
        let text = "n = @A(x)";
        let occurrences = parse(text);
        let mut record = SubstitutionRecord::pending("test.p", &occurrences[0]);
        record.result = Some(serde_json::json!({ "n": 1 }));
        let rendered = render_plain(&merge(text, &[record]).unwrap());
        assert_eq!(rendered, "n = {\"n\":1}");
    }
}
