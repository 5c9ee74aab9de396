//! Query engine invocation pipeline.
//!
//! One flush issues three engine invocations against the generated workspace:
//! the evaluation pass (answers every pending question through the generated
//! formatter script), the extraction pass (dumps the concrete action graph),
//! and a build of the phony root (materializes the symlink forest the other
//! two passes do not create). The passes run strictly in sequence; a failure
//! in any of them aborts the flush. Nothing here retries, and no two
//! invocations may ever run concurrently against the same output base: the
//! engine's evaluation cache is not safe for concurrent writers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::actions::{self, BuildStatement};
use crate::context::EngineConfig;
use crate::demux;
use crate::errors::InvokeError;
use crate::label::canonicalize_label;
use crate::materialize::{self, PLATFORM_PACKAGE, PLATFORM_PREFIX};
use crate::request::{QueryRequest, DEFAULT_ARCH};
use crate::script;
use crate::util::fs;
use crate::util::ProcessBuilder;

/// Name of the intermediates subdirectory under the host build's output
/// directory; all generated files and logs land here.
pub const INTERMEDIATES_DIR: &str = "bazel";

const QUERY_ROOT: &str = "//:queryroot";
const PHONY_ROOT: &str = "//:phonyroot";

/// Pinned platform and toolchain labels, authored source-tree-relative and
/// canonicalized before use. Passing them explicitly keeps the engine's rc
/// files from injecting values that do not resolve from the generated
/// workspace; configuration transitions may still override the target
/// platform per config node.
const HOST_PLATFORM: &str = "//build/config/platforms:host_linux_x86_64";
const HOST_TOOLCHAINS: &str = "//build/toolchains/cc:all";

/// Everything a successful pipeline run hands back to the bridge.
pub(crate) struct FlushOutcome {
    pub answers: HashMap<QueryRequest, String>,
    pub statements: Vec<BuildStatement>,
}

/// Drives the three engine passes for one flush.
pub(crate) struct EngineInvoker<'a> {
    config: &'a EngineConfig,
    build_dir: &'a Path,
    invocations: usize,
}

impl<'a> EngineInvoker<'a> {
    pub fn new(config: &'a EngineConfig, build_dir: &'a Path) -> Self {
        EngineInvoker {
            config,
            build_dir,
            invocations: 0,
        }
    }

    /// Subprocesses launched so far, failed ones included.
    pub fn invocation_count(&self) -> usize {
        self.invocations
    }

    /// Intermediates directory as a workspace-relative path.
    fn intermediates_rel(&self) -> PathBuf {
        self.build_dir.join(INTERMEDIATES_DIR)
    }

    /// Intermediates directory resolved against the workspace root.
    fn intermediates_abs(&self) -> PathBuf {
        self.config.workspace_dir.join(self.intermediates_rel())
    }

    /// Run the full pipeline for the given pending set.
    pub fn run(&mut self, pending: &HashSet<QueryRequest>) -> Result<FlushOutcome> {
        let intermediates = self.intermediates_abs();
        fs::ensure_dir(&intermediates)?;

        fs::write_string(
            &intermediates.join("WORKSPACE.bazel"),
            &materialize::workspace_file_contents(&self.config.workspace_dir),
        )?;
        fs::write_string(
            &intermediates.join("rules.bzl"),
            &materialize::rules_module_contents(),
        )?;
        fs::write_string(
            &intermediates.join("BUILD.bazel"),
            &materialize::root_build_file_contents(pending),
        )?;
        let script_rel = self.intermediates_rel().join("queryroot.cquery");
        fs::write_string(
            &self.config.workspace_dir.join(&script_rel),
            &script::query_script_contents(pending),
        )?;

        let (cquery_stdout, cquery_stderr) = self.issue_command(
            "cquery-queryroot",
            "cquery",
            &[format!("kind(rule, deps({}))", QUERY_ROOT)],
            &[
                "--output=starlark".to_string(),
                format!("--starlark:file={}", script_rel.display()),
            ],
        )?;
        // Persisted for post-hoc debugging; the flush itself parses the
        // in-memory copy.
        fs::write_string(&intermediates.join("cquery.out"), &cquery_stdout)?;

        let answers = demux::join_answers(pending, &cquery_stdout, &cquery_stderr)?;

        let (aquery_stdout, _aquery_stderr) = self.issue_command(
            "aquery-queryroot",
            "aquery",
            &[format!("deps({})", QUERY_ROOT)],
            &["--output=jsonproto".to_string()],
        )?;
        let statements = actions::build_statements(&aquery_stdout, &self.config.execroot())?;

        // No query here: building the phony root only creates the symlink
        // forest the host build needs for reading source files in place.
        self.issue_command("build-phonyroot", "build", &[PHONY_ROOT.to_string()], &[])?;

        Ok(FlushOutcome {
            answers,
            statements,
        })
    }

    /// Assemble one engine invocation with the standard flag set, in stable
    /// order: output base, command, its arguments, then package path, profile,
    /// pinned platforms/toolchains, the network-fetch kill switch, and any
    /// per-command extras.
    fn build_invocation(
        &self,
        run_name: &str,
        command: &str,
        arguments: &[String],
        extra_flags: &[String],
    ) -> ProcessBuilder {
        let target_platform =
            format!("{}:{}{}", PLATFORM_PACKAGE, PLATFORM_PREFIX, DEFAULT_ARCH);
        let profile = self.config.metrics_dir.join(format!("{}.profile", run_name));

        let mut invocation = ProcessBuilder::new(&self.config.executable)
            .arg(format!(
                "--output_base={}",
                self.config.output_base.display()
            ))
            .arg(command)
            .args(arguments)
            .arg(format!(
                "--package_path=%workspace%/{}",
                self.intermediates_rel().display()
            ))
            .arg(format!("--profile={}", profile.display()))
            .arg(format!(
                "--platforms={}",
                canonicalize_label(&target_platform)
            ))
            .arg(format!(
                "--extra_toolchains={}",
                canonicalize_label(HOST_TOOLCHAINS)
            ))
            .arg(format!("--host_platform={}", canonicalize_label(HOST_PLATFORM)))
            .arg("--experimental_repository_disable_download")
            .args(extra_flags)
            .cwd(&self.config.workspace_dir)
            .env("HOME", self.config.home.display().to_string())
            // Toolchains are pinned in the generated files; local detection
            // would only produce labels that cannot resolve here.
            .env("BAZEL_DO_NOT_DETECT_CPP_TOOLCHAIN", "1");
        if let Some((key, value)) = pwd_hint() {
            invocation = invocation.env(key, value);
        }
        invocation
    }

    /// Launch one engine pass, capturing output. Non-zero exit is fatal and
    /// surfaces the full command line, environment, and stderr.
    fn issue_command(
        &mut self,
        run_name: &str,
        command: &str,
        arguments: &[String],
        extra_flags: &[String],
    ) -> Result<(String, String)> {
        let invocation = self.build_invocation(run_name, command, arguments, extra_flags);
        tracing::debug!(
            "query engine {} pass: {}",
            run_name,
            invocation.display_command()
        );

        self.invocations += 1;
        let output = invocation.exec()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(InvokeError::CommandFailed {
                command: invocation.display_command(),
                env: invocation.display_env(),
                stderr,
            }
            .into());
        }
        Ok((stdout, stderr))
    }
}

/// Working-directory hint for sandboxed execution. Platforms without procfs
/// get no hint.
fn pwd_hint() -> Option<(&'static str, &'static str)> {
    if cfg!(target_os = "macos") {
        None
    } else {
        Some(("PWD", "/proc/self/cwd"))
    }
}
