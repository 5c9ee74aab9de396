//! Query script generation.
//!
//! The evaluation pass runs with a Starlark formatter script that is invoked
//! once per configured node in the evaluated graph. The script generated here
//! carries one membership map and one answer function per question kind, plus
//! a dispatcher that emits exactly one line per node:
//! `<label>|<arch>>><answer>` for nodes someone asked about, and
//! `<label>|<arch>>>NONE` for nodes pulled in only as dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::demux::ANSWER_MARKER;
use crate::materialize::{GENERATED_HEADER, PLATFORM_PREFIX};
use crate::request::{QueryKind, QueryRequest, IDENTITY_SEPARATOR};

/// Answer emitted for nodes that match no pending request.
pub const UNREQUESTED_MARKER: &str = "NONE";

/// Contents of the Starlark formatter script for the given pending set.
pub fn query_script_contents(pending: &HashSet<QueryRequest>) -> String {
    let mut ids_by_kind: HashMap<QueryKind, BTreeSet<String>> = HashMap::new();
    for request in pending {
        ids_by_kind
            .entry(request.kind)
            .or_default()
            .insert(request.identity());
    }

    let mut script = format!("{}\n", GENERATED_HEADER);

    for kind in QueryKind::ALL {
        script.push_str(&format!("\n{}_ids = {{\n", kind.name()));
        if let Some(ids) = ids_by_kind.get(&kind) {
            for id in ids {
                script.push_str(&format!("  \"{}\": True,\n", id));
            }
        }
        script.push_str("}\n");

        script.push_str(&format!("\ndef {}_fn(target):\n", kind.name()));
        script.push_str(&indent(kind.starlark_function_body()));
    }

    script.push_str(&format!(
        r#"
def get_arch(target):
  platforms = build_options(target)["//command_line_option:platforms"]
  if len(platforms) != 1:
    # A configured node resolves to exactly one platform. The same label may
    # appear under several architectures, but each is its own configured node.
    fail("expected exactly one platform for " + str(target.label) + " but got " + str(platforms))
  platform_name = platforms[0].name
  if platform_name == "host":
    return "HOST"
  if not platform_name.startswith("{prefix}"):
    fail("expected a platform named '{prefix}<arch>', got " + str(platforms))
  return platform_name[len("{prefix}"):]

def format(target):
  id_string = str(target.label) + "{separator}" + get_arch(target)
"#,
        prefix = PLATFORM_PREFIX,
        separator = IDENTITY_SEPARATOR,
    ));

    for kind in QueryKind::ALL {
        script.push_str(&format!(
            "  if id_string in {name}_ids:\n    return id_string + \"{marker}\" + {name}_fn(target)\n",
            name = kind.name(),
            marker = ANSWER_MARKER,
        ));
    }

    script.push_str(&format!(
        "\n  # Not requested directly; pulled in as a dependency of a requested node.\n  return id_string + \"{}{}\"\n",
        ANSWER_MARKER, UNREQUESTED_MARKER,
    ));

    script
}

fn indent(body: &str) -> String {
    body.lines().map(|line| format!("  {}\n", line)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(requests: &[QueryRequest]) -> HashSet<QueryRequest> {
        requests.iter().cloned().collect()
    }

    #[test]
    fn test_script_registers_identity() {
        let set = pending(&[QueryRequest::new(
            "//pkg:lib",
            QueryKind::OutputFiles,
            "arm64",
        )]);

        let script = query_script_contents(&set);
        assert!(script.contains("\"@srctree//pkg:lib|arm64\": True,"));
    }

    #[test]
    fn test_script_emits_one_section_per_kind() {
        let script = query_script_contents(&HashSet::new());

        for kind in QueryKind::ALL {
            assert!(script.contains(&format!("{}_ids = {{", kind.name())));
            assert!(script.contains(&format!("def {}_fn(target):", kind.name())));
        }
        assert!(script.contains("def get_arch(target):"));
        assert!(script.contains("def format(target):"));
        assert!(script.contains(">>NONE"));
    }

    #[test]
    fn test_script_dispatch_order_is_fixed() {
        let script = query_script_contents(&HashSet::new());
        let first = script.find("if id_string in output_files_ids:").unwrap();
        let second = script
            .find("if id_string in output_files_and_objects_ids:")
            .unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_script_function_bodies_are_indented() {
        let script = query_script_contents(&HashSet::new());
        assert!(script.contains("def output_files_fn(target):\n  return \", \".join"));
    }

    #[test]
    fn test_script_is_deterministic() {
        let set = pending(&[
            QueryRequest::new("//pkg:b", QueryKind::OutputFiles, "arm"),
            QueryRequest::new("//pkg:a", QueryKind::OutputFilesAndObjectFiles, "arm"),
        ]);
        assert_eq!(query_script_contents(&set), query_script_contents(&set));
    }
}
