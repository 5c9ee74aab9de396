//! End-to-end flush tests against a stub query engine.
//!
//! The stub is a generated shell script that plays the engine's part: it
//! answers the evaluation pass with canned identity lines, the extraction
//! pass with a canned action graph dump, and the build pass with silence.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tempfile::TempDir;

use gangway::{EngineConfig, QueryBridge};

/// Stub that answers the single registered question and emits one action.
const ANSWERING_STUB: &str = r#"#!/bin/sh
case " $* " in
  *" cquery "*)
    cat <<'EOF'
@srctree//pkg:lib|x86_64>>out/pkg/lib.a
@srctree//pkg:dep|x86_64>>NONE
EOF
    ;;
  *" aquery "*)
    cat <<'EOF'
{
  "artifacts": [
    {"id": 1, "execPath": "pkg/lib.c"},
    {"id": 2, "execPath": "out/pkg/lib.o"},
    {"id": 3, "execPath": "out/pkg/lib.a"}
  ],
  "depSetOfFiles": [
    {"id": 1, "directArtifactIds": [1]}
  ],
  "actions": [
    {
      "mnemonic": "CppArchive",
      "arguments": ["ar", "rcs", "out/pkg/lib.a", "out/pkg/lib.o"],
      "inputDepSetIds": [1],
      "outputIds": [3]
    }
  ]
}
EOF
    ;;
esac
exit 0
"#;

/// Stub whose evaluation pass never answers the registered question.
const UNANSWERING_STUB: &str = r#"#!/bin/sh
case " $* " in
  *" cquery "*)
    echo '@srctree//pkg:dep|x86_64>>NONE'
    ;;
  *" aquery "*)
    echo '{}'
    ;;
esac
exit 0
"#;

/// Stub that fails every invocation.
const FAILING_STUB: &str = r#"#!/bin/sh
echo 'evaluation cache corrupted' >&2
exit 3
"#;

fn stub_config(tmp: &TempDir, stub_body: &str) -> EngineConfig {
    let workspace_dir = tmp.path().join("workspace");
    fs::create_dir_all(&workspace_dir).unwrap();

    let executable = tmp.path().join("stub-engine.sh");
    fs::write(&executable, stub_body).unwrap();
    let mut perms = fs::metadata(&executable).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&executable, perms).unwrap();

    EngineConfig {
        home: tmp.path().join("home"),
        executable,
        output_base: tmp.path().join("output_base"),
        workspace_dir,
        metrics_dir: tmp.path().join("metrics"),
    }
}

#[test]
fn test_flush_answers_registered_question() {
    let tmp = TempDir::new().unwrap();
    let config = stub_config(&tmp, ANSWERING_STUB);
    let mut bridge = QueryBridge::new(config, "out");

    // Phase 1: the question is queued, not answered.
    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());

    bridge.flush().unwrap();

    // Phase 2: the same question now has a typed answer.
    let files = bridge.get_output_files("//pkg:lib", "x86_64").unwrap();
    assert_eq!(files, vec!["out/pkg/lib.a"]);

    // Evaluation, extraction, and the phony-root build: three invocations.
    assert_eq!(bridge.invocation_count(), 3);
}

#[test]
fn test_flush_translates_action_graph() {
    let tmp = TempDir::new().unwrap();
    let config = stub_config(&tmp, ANSWERING_STUB);
    let mut bridge = QueryBridge::new(config, "out");

    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
    bridge.flush().unwrap();

    let statements = bridge.build_statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].mnemonic, "CppArchive");
    assert_eq!(statements[0].command, "ar rcs out/pkg/lib.a out/pkg/lib.o");

    let execroot = bridge.execroot().unwrap();
    assert_eq!(
        statements[0].output_paths,
        vec![execroot.join("out/pkg/lib.a")]
    );
    assert_eq!(statements[0].input_paths, vec![execroot.join("pkg/lib.c")]);
    assert!(statements[0].depfile.is_none());
}

#[test]
fn test_flush_writes_generated_files_and_log() {
    let tmp = TempDir::new().unwrap();
    let config = stub_config(&tmp, ANSWERING_STUB);
    let workspace_dir = config.workspace_dir.clone();
    let mut bridge = QueryBridge::new(config, "out");

    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
    bridge.flush().unwrap();

    let intermediates = workspace_dir.join("out/bazel");
    for name in [
        "WORKSPACE.bazel",
        "rules.bzl",
        "BUILD.bazel",
        "queryroot.cquery",
        "cquery.out",
    ] {
        assert!(intermediates.join(name).is_file(), "missing {name}");
    }

    let build_file = fs::read_to_string(intermediates.join("BUILD.bazel")).unwrap();
    assert!(build_file.contains("\"@srctree//pkg:lib\""));

    let log = fs::read_to_string(intermediates.join("cquery.out")).unwrap();
    assert!(log.contains("@srctree//pkg:lib|x86_64>>out/pkg/lib.a"));
}

#[test]
fn test_flush_fails_on_unanswered_question() {
    let tmp = TempDir::new().unwrap();
    let config = stub_config(&tmp, UNANSWERING_STUB);
    let mut bridge = QueryBridge::new(config, "out");

    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
    let err = bridge.flush().unwrap_err();

    let message = err.to_string();
    assert!(
        message.contains("@srctree//pkg:lib|x86_64"),
        "error does not name the unanswered identity: {message}"
    );

    // The question is still pending; a later flush could answer it.
    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
}

#[test]
fn test_flush_surfaces_engine_failure() {
    let tmp = TempDir::new().unwrap();
    let config = stub_config(&tmp, FAILING_STUB);
    let mut bridge = QueryBridge::new(config, "out");

    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
    let err = bridge.flush().unwrap_err();

    let message = err.to_string();
    assert!(message.contains("query engine command failed"));
    assert!(message.contains("evaluation cache corrupted"));
    assert!(message.contains("cquery"));

    // The evaluation pass failed, so the later passes never ran.
    assert_eq!(bridge.invocation_count(), 1);
}

#[test]
fn test_bridge_without_environment_is_disabled() {
    let mut bridge = QueryBridge::from_env(PathBuf::from("out"));

    assert!(!bridge.is_enabled());
    assert!(bridge.get_output_files("//pkg:lib", "x86_64").is_none());
    assert!(bridge
        .get_output_files_and_object_files("//pkg:lib", "x86_64")
        .unwrap()
        .is_none());

    bridge.flush().unwrap();
    assert_eq!(bridge.invocation_count(), 0);
    assert!(bridge.build_statements().is_empty());
}
