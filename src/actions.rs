//! Action graph translation.
//!
//! The extraction pass dumps the engine's concrete action graph as JSON:
//! artifacts keyed by id, depsets of artifact ids, and actions referring to
//! both. Translation flattens that indirection into self-contained
//! [`BuildStatement`] records whose paths live in the host build's path space
//! (joined against the engine's execution root).

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ProtocolError;

/// One translated action, ready for registration as a host build rule.
///
/// Statements are recreated on every flush and never outlive the flush
/// cycle's consumer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatement {
    /// Full shell command line, arguments quoted.
    pub command: String,
    /// The engine's mnemonic for the action (e.g. `CppCompile`).
    pub mnemonic: String,
    /// Declared outputs, rooted in the execution root.
    pub output_paths: Vec<PathBuf>,
    /// Declared inputs, rooted in the execution root.
    pub input_paths: Vec<PathBuf>,
    /// Dependency file written by the action, if it declares one.
    pub depfile: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionGraphContainer {
    #[serde(default)]
    artifacts: Vec<Artifact>,
    #[serde(default)]
    actions: Vec<Action>,
    #[serde(default)]
    dep_set_of_files: Vec<DepSetOfFiles>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    id: u32,
    exec_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Action {
    #[serde(default)]
    mnemonic: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    input_dep_set_ids: Vec<u32>,
    #[serde(default)]
    output_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepSetOfFiles {
    id: u32,
    #[serde(default)]
    direct_artifact_ids: Vec<u32>,
    #[serde(default)]
    transitive_dep_set_ids: Vec<u32>,
}

/// Decode an action graph dump and translate every action into a
/// [`BuildStatement`], rooting all paths at `execroot`.
pub fn build_statements(
    aquery_json: &str,
    execroot: &Path,
) -> Result<Vec<BuildStatement>, anyhow::Error> {
    let container: ActionGraphContainer =
        serde_json::from_str(aquery_json).map_err(anyhow::Error::from)?;

    let artifact_paths: HashMap<u32, &str> = container
        .artifacts
        .iter()
        .map(|artifact| (artifact.id, artifact.exec_path.as_str()))
        .collect();
    let dep_sets: HashMap<u32, &DepSetOfFiles> = container
        .dep_set_of_files
        .iter()
        .map(|dep_set| (dep_set.id, dep_set))
        .collect();

    let mut flattener = DepSetFlattener {
        dep_sets,
        flattened: HashMap::new(),
    };

    let mut statements = Vec::with_capacity(container.actions.len());
    for action in &container.actions {
        if action.arguments.is_empty() {
            return Err(ProtocolError::EmptyCommand {
                mnemonic: action.mnemonic.clone(),
            }
            .into());
        }
        let command = action
            .arguments
            .iter()
            .map(|argument| shell_quote(argument))
            .collect::<Vec<_>>()
            .join(" ");

        let mut output_paths = Vec::new();
        let mut depfile = None;
        for output_id in &action.output_ids {
            let exec_path = *artifact_paths
                .get(output_id)
                .ok_or(ProtocolError::UnknownArtifact { id: *output_id })?;
            let path = execroot.join(exec_path);
            if path.extension().is_some_and(|ext| ext == "d") {
                if depfile.is_some() {
                    return Err(ProtocolError::DuplicateDepfile {
                        mnemonic: action.mnemonic.clone(),
                    }
                    .into());
                }
                depfile = Some(path);
            } else {
                output_paths.push(path);
            }
        }

        let mut input_paths = Vec::new();
        for dep_set_id in &action.input_dep_set_ids {
            for artifact_id in flattener.flatten(*dep_set_id)? {
                let exec_path = *artifact_paths
                    .get(&artifact_id)
                    .ok_or(ProtocolError::UnknownArtifact { id: artifact_id })?;
                input_paths.push(execroot.join(exec_path));
            }
        }

        statements.push(BuildStatement {
            command,
            mnemonic: action.mnemonic.clone(),
            output_paths,
            input_paths,
            depfile,
        });
    }

    Ok(statements)
}

/// Flattens depset trees to artifact id lists, memoizing shared subtrees.
struct DepSetFlattener<'a> {
    dep_sets: HashMap<u32, &'a DepSetOfFiles>,
    flattened: HashMap<u32, Vec<u32>>,
}

impl DepSetFlattener<'_> {
    fn flatten(&mut self, id: u32) -> Result<Vec<u32>, ProtocolError> {
        if let Some(cached) = self.flattened.get(&id) {
            return Ok(cached.clone());
        }

        let dep_set = *self
            .dep_sets
            .get(&id)
            .ok_or(ProtocolError::UnknownDepSet { id })?;

        let mut artifact_ids = dep_set.direct_artifact_ids.clone();
        for transitive_id in &dep_set.transitive_dep_set_ids {
            artifact_ids.extend(self.flatten(*transitive_id)?);
        }

        self.flattened.insert(id, artifact_ids.clone());
        Ok(artifact_ids)
    }
}

/// Quote an argument for inclusion in a POSIX shell command line.
fn shell_quote(argument: &str) -> Cow<'_, str> {
    let safe = !argument.is_empty()
        && argument
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        Cow::Borrowed(argument)
    } else {
        Cow::Owned(format!("'{}'", argument.replace('\'', r"'\''")))
    }
}
