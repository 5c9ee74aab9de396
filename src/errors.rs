//! Typed failure taxonomy for the bridge.
//!
//! Three families, matching how each is handled: configuration errors degrade
//! the bridge to disabled mode at construction time, invocation errors abort
//! the current flush with the full command context, and protocol errors mark a
//! contract violation between the generated query script and the decoder.
//! None of these are retried.

use thiserror::Error;

/// Error constructing the engine configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment settings: {}", vars.join(", "))]
    MissingEnv { vars: Vec<String> },
}

/// Error from one of the query engine subprocess invocations.
///
/// These pipelines are diagnosed by humans reading build logs, so the message
/// carries the full command line, environment, and stderr verbatim.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("query engine command failed. command: [{command}], env: [{env}], stderr: [{stderr}]")]
    CommandFailed {
        command: String,
        env: String,
        stderr: String,
    },
}

/// A violation of the contract between the generated query script, the
/// evaluation output, and the action graph dump.
///
/// Every variant is fatal to the flush: a missing or malformed answer means
/// either a bridge defect or an environment mismatch, and silently defaulting
/// would hand the host build system wrong outputs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing result for target {identity}. query output: [{output}], stderr: [{stderr}]")]
    MissingAnswer {
        identity: String,
        output: String,
        stderr: String,
    },

    #[error("malformed answer for {identity}: `{raw}`")]
    MalformedAnswer { identity: String, raw: String },

    #[error("action with mnemonic `{mnemonic}` has an empty command line")]
    EmptyCommand { mnemonic: String },

    #[error("action graph references unknown artifact id {id}")]
    UnknownArtifact { id: u32 },

    #[error("action graph references unknown depset id {id}")]
    UnknownDepSet { id: u32 },

    #[error("action with mnemonic `{mnemonic}` declares more than one dependency file")]
    DuplicateDepfile { mnemonic: String },
}
