//! Evaluation output demultiplexing.
//!
//! The evaluation pass prints one line per configured node. Lines are split on
//! the first occurrence of the answer marker into an identity and a raw
//! answer; pending requests are then joined against those identities by plain
//! string equality. Per-kind parsing stays out of this module: the raw answer
//! is stored as-is and decoded only when a typed accessor asks for it.

use std::collections::{HashMap, HashSet};

use crate::errors::ProtocolError;
use crate::request::QueryRequest;

/// Marker joining a node's identity to its answer in an output line.
pub const ANSWER_MARKER: &str = ">>";

/// Split evaluation stdout into an identity-to-raw-answer map.
///
/// Lines without the marker (engine banners, blank lines) are ignored.
pub fn parse_answer_lines(stdout: &str) -> HashMap<String, String> {
    let mut answers = HashMap::new();
    for line in stdout.lines() {
        if let Some((identity, raw)) = line.split_once(ANSWER_MARKER) {
            answers.insert(identity.to_string(), raw.to_string());
        }
    }
    answers
}

/// Join every pending request against the parsed evaluation output.
///
/// Partial success is not a valid end state: any pending request whose
/// identity is missing from the output fails the whole flush, with the full
/// captured output preserved for diagnosis.
pub fn join_answers(
    pending: &HashSet<QueryRequest>,
    stdout: &str,
    stderr: &str,
) -> Result<HashMap<QueryRequest, String>, ProtocolError> {
    let parsed = parse_answer_lines(stdout);

    let mut answers = HashMap::with_capacity(pending.len());
    for request in pending {
        let identity = request.identity();
        match parsed.get(&identity) {
            Some(raw) => {
                answers.insert(request.clone(), raw.clone());
            }
            None => {
                return Err(ProtocolError::MissingAnswer {
                    identity,
                    output: stdout.to_string(),
                    stderr: stderr.to_string(),
                });
            }
        }
    }
    Ok(answers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QueryKind;

    #[test]
    fn test_parse_splits_on_first_marker() {
        let parsed = parse_answer_lines("@srctree//pkg:lib|arm>>out/lib.a>>weird\n");
        assert_eq!(
            parsed.get("@srctree//pkg:lib|arm").map(String::as_str),
            Some("out/lib.a>>weird")
        );
    }

    #[test]
    fn test_parse_ignores_unmarked_lines() {
        let parsed = parse_answer_lines("INFO: analyzed 3 targets\n\n@srctree//a|arm>>x\n");
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_join_matches_pending_request() {
        let pending: HashSet<_> = [QueryRequest::new("//pkg:lib", QueryKind::OutputFiles, "arm")]
            .into_iter()
            .collect();

        let joined = join_answers(&pending, "@srctree//pkg:lib|arm>>out/pkg/lib.a\n", "").unwrap();
        assert_eq!(
            joined
                .get(&QueryRequest::new("//pkg:lib", QueryKind::OutputFiles, "arm"))
                .map(String::as_str),
            Some("out/pkg/lib.a")
        );
    }

    #[test]
    fn test_join_fails_on_unanswered_request() {
        let pending: HashSet<_> = [
            QueryRequest::new("//pkg:lib", QueryKind::OutputFiles, "arm"),
            QueryRequest::new("//pkg:other", QueryKind::OutputFiles, "arm"),
        ]
        .into_iter()
        .collect();

        let result = join_answers(&pending, "@srctree//pkg:lib|arm>>out/pkg/lib.a\n", "boom");
        let err = result.unwrap_err();
        match err {
            ProtocolError::MissingAnswer {
                identity, stderr, ..
            } => {
                assert_eq!(identity, "@srctree//pkg:other|arm");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_join_tolerates_unrequested_nodes() {
        let pending: HashSet<_> = [QueryRequest::new("//pkg:lib", QueryKind::OutputFiles, "arm")]
            .into_iter()
            .collect();

        let stdout = "@srctree//pkg:dep|arm>>NONE\n@srctree//pkg:lib|arm>>out/pkg/lib.a\n";
        let joined = join_answers(&pending, stdout, "").unwrap();
        assert_eq!(joined.len(), 1);
    }
}
