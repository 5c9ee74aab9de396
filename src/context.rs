//! Bridge context: the request registry and the consumer-facing API.
//!
//! A [`QueryBridge`] lives for one host build invocation and moves through two
//! phases. During graph construction (phase 1) any number of threads call the
//! ask-a-question methods through `&self`; unanswered questions accumulate in
//! the pending set behind a mutex scoped to the insert alone, while answer
//! lookups read a map that is only ever written between phases. The single
//! [`QueryBridge::flush`] call (phase 2) takes `&mut self`, so registering
//! concurrently with a flush is not a documented hazard here: the borrow
//! checker rejects it.

use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use crate::actions::BuildStatement;
use crate::errors::{ConfigError, ProtocolError};
use crate::invoke::EngineInvoker;
use crate::request::{
    parse_output_files, parse_output_files_and_objects, OutputFilesAndObjects, QueryKind,
    QueryRequest,
};

/// Environment settings locating the query engine installation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Home directory override for engine subprocesses.
    pub home: PathBuf,
    /// Engine executable path.
    pub executable: PathBuf,
    /// Shared output base directory holding the engine's evaluation cache.
    pub output_base: PathBuf,
    /// Root of the primary source tree; engine working directory.
    pub workspace_dir: PathBuf,
    /// Directory receiving per-invocation profile output.
    pub metrics_dir: PathBuf,
}

impl EngineConfig {
    /// Environment variables supplying the five required settings.
    pub const ENV_HOME: &'static str = "BAZEL_HOME";
    pub const ENV_EXECUTABLE: &'static str = "BAZEL_PATH";
    pub const ENV_OUTPUT_BASE: &'static str = "BAZEL_OUTPUT_BASE";
    pub const ENV_WORKSPACE: &'static str = "BAZEL_WORKSPACE";
    pub const ENV_METRICS_DIR: &'static str = "BAZEL_METRICS_DIR";

    /// Read the configuration from the environment.
    ///
    /// All five settings are required; the error lists every missing one at
    /// once rather than failing on the first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut lookup = |name: &str| match env::var(name) {
            Ok(value) if !value.is_empty() => PathBuf::from(value),
            _ => {
                missing.push(name.to_string());
                PathBuf::new()
            }
        };

        let config = EngineConfig {
            home: lookup(Self::ENV_HOME),
            executable: lookup(Self::ENV_EXECUTABLE),
            output_base: lookup(Self::ENV_OUTPUT_BASE),
            workspace_dir: lookup(Self::ENV_WORKSPACE),
            metrics_dir: lookup(Self::ENV_METRICS_DIR),
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::MissingEnv { vars: missing })
        }
    }

    /// The engine's execution root; action paths resolve against this.
    pub fn execroot(&self) -> PathBuf {
        self.output_base.join("execroot").join("__main__")
    }
}

/// The bridge between the host build's graph construction and the query
/// engine.
///
/// Without a configuration the bridge is *disabled*: every question returns
/// "not answered", flushing is a no-op, and no subprocess is ever launched.
/// There is no partial-capability mode in between.
pub struct QueryBridge {
    config: Option<EngineConfig>,
    /// Host build output directory, relative to the workspace root.
    build_dir: PathBuf,
    /// Questions queued since the last flush. Insert-only between flushes.
    pending: Mutex<HashSet<QueryRequest>>,
    /// Raw answers from the most recent flush. Written only by `flush`.
    answers: HashMap<QueryRequest, String>,
    /// Translated action list from the most recent flush.
    statements: Vec<BuildStatement>,
    invocations: usize,
}

impl QueryBridge {
    /// Create an enabled bridge.
    pub fn new(config: EngineConfig, build_dir: impl Into<PathBuf>) -> Self {
        QueryBridge {
            config: Some(config),
            build_dir: build_dir.into(),
            pending: Mutex::new(HashSet::new()),
            answers: HashMap::new(),
            statements: Vec::new(),
            invocations: 0,
        }
    }

    /// Create a disabled bridge: all queries unanswered, no subprocesses.
    pub fn disabled(build_dir: impl Into<PathBuf>) -> Self {
        QueryBridge {
            config: None,
            build_dir: build_dir.into(),
            pending: Mutex::new(HashSet::new()),
            answers: HashMap::new(),
            statements: Vec::new(),
            invocations: 0,
        }
    }

    /// Create a bridge from the environment, degrading to disabled mode if
    /// any required setting is missing. The degradation is reported once,
    /// here, and never fails the host build.
    pub fn from_env(build_dir: impl Into<PathBuf>) -> Self {
        match EngineConfig::from_env() {
            Ok(config) => Self::new(config, build_dir),
            Err(err) => {
                tracing::warn!("query bridge disabled: {}", err);
                Self::disabled(build_dir)
            }
        }
    }

    /// Whether the bridge has a usable engine configuration.
    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Queue a question, or return its raw answer if a prior flush already
    /// produced one. Re-registering a pending question is a no-op.
    ///
    /// Safe to call from many threads at once; only the pending-set insert
    /// takes a lock.
    pub fn register(&self, request: QueryRequest) -> Option<&str> {
        if self.config.is_none() {
            return None;
        }
        if let Some(answer) = self.answers.get(&request) {
            return Some(answer.as_str());
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(request);
        None
    }

    /// Output files produced by building `label` under `arch`, or `None` if
    /// the question was queued for the next flush.
    pub fn get_output_files(&self, label: &str, arch: &str) -> Option<Vec<String>> {
        self.register(QueryRequest::new(label, QueryKind::OutputFiles, arch))
            .map(parse_output_files)
    }

    /// Output files and linker-input object files for `label` under `arch`,
    /// or `Ok(None)` if the question was queued for the next flush.
    pub fn get_output_files_and_object_files(
        &self,
        label: &str,
        arch: &str,
    ) -> Result<Option<OutputFilesAndObjects>, ProtocolError> {
        let request = QueryRequest::new(label, QueryKind::OutputFilesAndObjectFiles, arch);
        let identity = request.identity();
        match self.register(request) {
            Some(raw) => parse_output_files_and_objects(&identity, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Turn every pending question into an answer and refresh the translated
    /// action list, then clear the pending set.
    ///
    /// Runs the whole pipeline: workspace materialization, the evaluation
    /// pass, answer demultiplexing, action extraction, and the symlink-forest
    /// build. Any failure is terminal for this flush; the pending set is left
    /// intact so the error can be diagnosed against it. Disabled bridges
    /// return success without doing anything.
    pub fn flush(&mut self) -> Result<()> {
        let Some(config) = self.config.clone() else {
            tracing::debug!("query bridge disabled; nothing to flush");
            return Ok(());
        };

        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut invoker = EngineInvoker::new(&config, &self.build_dir);
        let result = invoker.run(&pending);
        self.invocations += invoker.invocation_count();
        let outcome = result?;

        self.answers = outcome.answers;
        self.statements = outcome.statements;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        tracing::info!("answered {} queued queries", pending.len());
        Ok(())
    }

    /// Build statements translated from the most recent flush.
    pub fn build_statements(&self) -> &[BuildStatement] {
        &self.statements
    }

    /// The engine's shared output base, if the bridge is enabled. Consumers
    /// prefix registered action commands with a working directory under this
    /// path.
    pub fn output_base(&self) -> Option<&Path> {
        self.config.as_ref().map(|config| config.output_base.as_path())
    }

    /// The engine's execution root, if the bridge is enabled.
    pub fn execroot(&self) -> Option<PathBuf> {
        self.config.as_ref().map(EngineConfig::execroot)
    }

    /// Engine subprocesses launched over this bridge's lifetime.
    pub fn invocation_count(&self) -> usize {
        self.invocations
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub(crate) fn seed_answer(&mut self, request: QueryRequest, raw: impl Into<String>) {
        self.answers.insert(request, raw.into());
    }
}
