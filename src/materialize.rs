//! Synthetic workspace generation.
//!
//! The flush does not ask the query engine one question at a time. Instead it
//! generates a small workspace whose root target depends, through one
//! configuration node per requested architecture, on every label anyone asked
//! about; evaluating that root forces the engine to answer everything in one
//! pass. The functions here are pure text producers over the pending request
//! set, with file writing kept in the invocation pipeline, so each generated
//! body can be unit-tested against literal strings.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::label::canonicalize_label;
use crate::request::QueryRequest;

/// First line of every generated file.
pub const GENERATED_HEADER: &str = "# This file is generated by gangway. Do not edit.";

/// Package holding the per-architecture platform definitions in the primary
/// source tree.
pub(crate) const PLATFORM_PACKAGE: &str = "//build/config/platforms";

/// Platform names are `target_<arch>`; the query script strips this prefix to
/// recover the architecture tag.
pub(crate) const PLATFORM_PREFIX: &str = "target_";

/// Contents of the workspace linkage descriptor.
///
/// Links the primary source tree into the generated workspace as `@srctree`,
/// along with the ruleset bundled inside it, so that source-tree labels
/// resolve once canonicalized.
pub fn workspace_file_contents(workspace_dir: &Path) -> String {
    format!(
        r#"{header}

local_repository(
    name = "srctree",
    path = "{dir}",
)

local_repository(
    name = "rules_cc",
    path = "{dir}/build/rules_cc",
)
"#,
        header = GENERATED_HEADER,
        dir = workspace_dir.display(),
    )
}

/// Contents of the Starlark module defining the bridge's rule vocabulary: the
/// architecture transition, `config_node`, `query_root`, and `phony_root`.
pub fn rules_module_contents() -> String {
    format!(
        r#"{header}

def _config_node_transition_impl(settings, attr):
    return {{
        "//command_line_option:platforms": "@srctree{platform_package}:{platform_prefix}%s" % attr.arch,
    }}

_config_node_transition = transition(
    implementation = _config_node_transition_impl,
    inputs = [],
    outputs = [
        "//command_line_option:platforms",
    ],
)

def _passthrough_rule_impl(ctx):
    return [DefaultInfo(files = depset(ctx.files.deps))]

# Forces evaluation of a set of labels under one fixed target architecture.
config_node = rule(
    implementation = _passthrough_rule_impl,
    attrs = {{
        "arch": attr.string(mandatory = True),
        "deps": attr.label_list(cfg = _config_node_transition),
        "_allowlist_function_transition": attr.label(default = "@bazel_tools//tools/allowlists/function_transition_allowlist"),
    }},
)

# Root of the generated graph. Building it builds every requested target.
query_root = rule(
    implementation = _passthrough_rule_impl,
    attrs = {{"deps": attr.label_list()}},
)

def _phony_root_impl(ctx):
    return []

# Depends on other targets but builds nothing. Building a target of this rule
# creates the symlink forests for its dependencies without executing any of
# their actions.
phony_root = rule(
    implementation = _phony_root_impl,
    attrs = {{"deps": attr.label_list()}},
)
"#,
        header = GENERATED_HEADER,
        platform_package = PLATFORM_PACKAGE,
        platform_prefix = PLATFORM_PREFIX,
    )
}

/// Contents of the root build file: one `config_node` per distinct requested
/// architecture, a `query_root` over all of them, and a `phony_root` over the
/// `query_root`.
///
/// Architecture groups and the labels inside each group are emitted in sorted
/// order so the file is byte-stable for a fixed pending set.
pub fn root_build_file_contents(pending: &HashSet<QueryRequest>) -> String {
    let mut labels_by_arch: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for request in pending {
        labels_by_arch
            .entry(request.arch_or_default().to_string())
            .or_default()
            .insert(canonicalize_label(&request.label));
    }

    let mut contents = format!(
        "{}\nload(\":rules.bzl\", \"config_node\", \"query_root\", \"phony_root\")\n",
        GENERATED_HEADER
    );

    for (arch, labels) in &labels_by_arch {
        contents.push_str(&format!(
            "\nconfig_node(\n    name = \"{arch}\",\n    arch = \"{arch}\",\n    deps = [\n"
        ));
        for label in labels {
            contents.push_str(&format!("        \"{}\",\n", label));
        }
        contents.push_str("    ],\n)\n");
    }

    contents.push_str("\nquery_root(\n    name = \"queryroot\",\n    deps = [\n");
    for arch in labels_by_arch.keys() {
        contents.push_str(&format!("        \":{}\",\n", arch));
    }
    contents.push_str("    ],\n)\n");

    contents.push_str("\nphony_root(\n    name = \"phonyroot\",\n    deps = [\":queryroot\"],\n)\n");

    contents
}
