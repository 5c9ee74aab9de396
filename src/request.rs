//! Query requests and the closed set of question kinds.
//!
//! A [`QueryRequest`] is the registry key: label, kind, architecture. Two
//! requests with identical fields are the same request. Each [`QueryKind`]
//! owns both sides of its wire format: the Starlark fragment that computes the
//! answer for a matched node, and the parser that turns the raw answer string
//! back into a typed value. Keeping both on the same enum variant is what
//! keeps them in agreement.

use crate::errors::ProtocolError;
use crate::label::canonicalize_label;

/// Architecture used when a request carries no explicit tag. Host-context
/// targets resolve under the default platform, which the query script reports
/// under this name.
pub const DEFAULT_ARCH: &str = "x86_64";

/// Separator between a node's label and its architecture in an identity
/// string.
pub const IDENTITY_SEPARATOR: &str = "|";

/// The closed set of questions the bridge knows how to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// The output files produced by building the target.
    OutputFiles,
    /// The output files plus the object files of the target's linker inputs.
    OutputFilesAndObjectFiles,
}

impl QueryKind {
    /// All kinds, in the fixed order the generated dispatcher checks them.
    pub const ALL: [QueryKind; 2] = [QueryKind::OutputFiles, QueryKind::OutputFilesAndObjectFiles];

    /// Stable identifier used to name the generated per-kind map and function.
    pub fn name(self) -> &'static str {
        match self {
            QueryKind::OutputFiles => "output_files",
            QueryKind::OutputFilesAndObjectFiles => "output_files_and_objects",
        }
    }

    /// Starlark function body computing this kind's answer for a matched node.
    ///
    /// The format emitted here must round-trip through the matching parser
    /// below: a change to one is a change to both.
    pub fn starlark_function_body(self) -> &'static str {
        match self {
            QueryKind::OutputFiles => r#"return ", ".join([f.path for f in target.files.to_list()])"#,
            QueryKind::OutputFilesAndObjectFiles => {
                r#"output_files = [f.path for f in target.files.to_list()]
object_files = []
linker_inputs = providers(target)["CcInfo"].linking_context.linker_inputs.to_list()
for linker_input in linker_inputs:
  for library in linker_input.libraries:
    for object in library.objects:
      object_files.append(object.path)
return ", ".join(output_files) + "|" + ", ".join(object_files)"#
            }
        }
    }
}

/// Typed answer for [`QueryKind::OutputFilesAndObjectFiles`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFilesAndObjects {
    pub output_files: Vec<String>,
    pub object_files: Vec<String>,
}

/// Parse an [`QueryKind::OutputFiles`] answer: paths joined by `", "`.
pub fn parse_output_files(raw: &str) -> Vec<String> {
    split_or_empty(raw.trim(), ", ")
}

/// Parse an [`QueryKind::OutputFilesAndObjectFiles`] answer: two `", "`-joined
/// lists separated by a single `|`.
pub fn parse_output_files_and_objects(
    identity: &str,
    raw: &str,
) -> Result<OutputFilesAndObjects, ProtocolError> {
    let trimmed = raw.trim();
    let Some((outputs, objects)) = trimmed.split_once('|') else {
        return Err(ProtocolError::MalformedAnswer {
            identity: identity.to_string(),
            raw: raw.to_string(),
        });
    };
    Ok(OutputFilesAndObjects {
        output_files: split_or_empty(outputs, ", "),
        object_files: split_or_empty(objects, ", "),
    })
}

fn split_or_empty(s: &str, separator: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(separator).map(str::to_string).collect()
    }
}

/// A single queued question: one target label, one question kind, one
/// architecture. Immutable once created; structural equality makes identical
/// questions collapse into one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRequest {
    pub label: String,
    pub kind: QueryKind,
    pub arch: String,
}

impl QueryRequest {
    pub fn new(label: impl Into<String>, kind: QueryKind, arch: impl Into<String>) -> Self {
        QueryRequest {
            label: label.into(),
            kind,
            arch: arch.into(),
        }
    }

    /// The architecture tag, or [`DEFAULT_ARCH`] for host-context requests.
    pub fn arch_or_default(&self) -> &str {
        if self.arch.is_empty() {
            DEFAULT_ARCH
        } else {
            &self.arch
        }
    }

    /// The identity string under which this request's answer is emitted.
    ///
    /// Must byte-equal the identity the generated dispatcher computes for a
    /// node matching this request; the demultiplexer joins on string equality
    /// and nothing else.
    pub fn identity(&self) -> String {
        format!(
            "{}{}{}",
            canonicalize_label(&self.label),
            IDENTITY_SEPARATOR,
            self.arch_or_default()
        )
    }
}
