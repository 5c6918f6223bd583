//! Tests for reference resolution

use super::*;
use crate::compiler::compile_source;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/* ===================== Helpers ===================== */

fn form(source: &str) -> CompiledForm {
    compile_source(source, None).form
}

async fn execute(registry: &CapabilityRegistry, source: &str) -> Execution {
    execute_with(registry, source, Map::new()).await
}

async fn execute_with(
    registry: &CapabilityRegistry,
    source: &str,
    context: Map<String, Value>,
) -> Execution {
    let mut log = ExecutionLog::new();
    log.push("validate: ok");
    log.push("compile: task='t'");
    Interpreter::new(registry)
        .execute(&form(source), &context, log)
        .await
}

/// Records the kinds it was called with, after a short sleep
struct SlowRecorder {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CapabilityResolver for SlowRecorder {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.seen.lock().unwrap().push(request.kind.to_string());
        Ok(json!({ "kind": request.kind, "body": request.body }))
    }
}

/* ===================== Log Shape ===================== */

#[tokio::test]
async fn test_empty_registry_logs_every_reference_as_unresolved() {
    let registry = CapabilityRegistry::new();
    let execution = execute(
        &registry,
        "TASK: t\nACTION: a\nGOAL: g\n@tool:search{ q }\n@db:sales{ q }",
    )
    .await;

    assert_eq!(
        execution.log.entries(),
        &[
            "validate: ok",
            "compile: task='t'",
            "unresolved: tool:search",
            "unresolved: db:sales",
        ]
    );
    assert!(execution.resolved.is_empty());
    assert_eq!(execution.diagnostics.len(), 2);
    assert!(execution
        .diagnostics
        .iter()
        .all(|d| d.code == W_UNRESOLVED_REF && !d.is_error()));
}

#[tokio::test]
async fn test_no_references_no_entries() {
    let registry = CapabilityRegistry::new();
    let execution = execute(&registry, "TASK: t\nACTION: a\nGOAL: g").await;

    assert_eq!(execution.log.len(), 2);
    assert!(execution.diagnostics.is_empty());
}

/* ===================== Resolution ===================== */

#[tokio::test]
async fn test_resolved_outputs_are_collected_by_kind() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("tool:search", |request| Ok(json!(format!("results for {}", request.body))))
        .unwrap();

    let execution = execute(
        &registry,
        "TASK: t\nACTION: a\nGOAL: g\n@tool:search{ rust }\n@tool:search{ tokio }",
    )
    .await;

    assert_eq!(
        &execution.log.entries()[2..],
        &["resolved: tool:search", "resolved: tool:search"]
    );
    assert_eq!(
        execution.resolved.get("tool:search"),
        Some(&vec![json!("results for rust"), json!("results for tokio")])
    );
    assert!(execution.diagnostics.is_empty());
}

#[tokio::test]
async fn test_failing_resolver_does_not_stop_the_run() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("db", |_| Err(anyhow!("connection refused")))
        .unwrap();
    registry.register_fn("tool", |_| Ok(json!(true))).unwrap();

    let execution = execute(
        &registry,
        "TASK: t\nACTION: a\nGOAL: g\n@db:sales{ q }\n@tool:x{ q }\n@mail{ q }",
    )
    .await;

    assert_eq!(
        &execution.log.entries()[2..],
        &[
            "error in db:sales: connection refused",
            "resolved: tool:x",
            "unresolved: mail",
        ]
    );
    assert_eq!(execution.resolved.keys().collect::<Vec<_>>(), vec!["tool:x"]);

    let codes: Vec<_> = execution.diagnostics.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, vec![E_RESOLVER, W_UNRESOLVED_REF]);
    assert!(execution.diagnostics[0].is_error());
    assert!(execution.diagnostics[0].message.contains("connection refused"));
}

#[tokio::test]
async fn test_error_context_chain_is_logged() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("db", |_| {
            Err(anyhow!("timeout").context("query failed"))
        })
        .unwrap();

    let execution = execute(&registry, "TASK: t\nACTION: a\nGOAL: g\n@db{ q }").await;
    assert_eq!(execution.log.entries()[2], "error in db: query failed: timeout");
}

#[tokio::test]
async fn test_async_resolvers_run_in_source_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CapabilityRegistry::new();
    registry
        .register("a", SlowRecorder { seen: seen.clone() })
        .unwrap();
    registry
        .register("b", SlowRecorder { seen: seen.clone() })
        .unwrap();

    let execution = execute(
        &registry,
        "TASK: t @b{ first } x\nACTION: a\nGOAL: g\n@a{ second }\n@b{ third }",
    )
    .await;

    assert_eq!(*seen.lock().unwrap(), vec!["b", "a", "b"]);
    assert_eq!(
        execution.resolved.get("b"),
        Some(&vec![
            json!({ "kind": "b", "body": "first" }),
            json!({ "kind": "b", "body": "third" }),
        ])
    );
}

#[tokio::test]
async fn test_params_and_context_reach_the_resolver() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("db:sales", |request| {
            Ok(json!({
                "limit": request.params.get("limit"),
                "user": request.context.get("user"),
            }))
        })
        .unwrap();

    let mut context = Map::new();
    context.insert("user".to_string(), json!("ada"));

    let execution = execute_with(
        &registry,
        "TASK: t\nACTION: a\nGOAL: g\n@db:sales{ query: \"x\", limit: 3 }",
        context,
    )
    .await;

    assert_eq!(
        execution.resolved["db:sales"][0],
        json!({ "limit": "3", "user": "ada" })
    );
}

#[tokio::test]
async fn test_namespace_resolver_handles_qualified_kinds() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("tool", |request| Ok(json!(request.kind)))
        .unwrap();

    let execution = execute(&registry, "TASK: t\nACTION: a\nGOAL: g\n@tool:web{ q }").await;

    assert_eq!(execution.log.entries()[2], "resolved: tool:web");
    assert_eq!(execution.resolved["tool:web"], vec![json!("tool:web")]);
}

#[tokio::test]
async fn test_file_target_reaches_the_resolver() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("file", |request| {
            Ok(json!({ "path": request.target, "permission": request.params.get("permission") }))
        })
        .unwrap();

    let execution = execute(
        &registry,
        "TASK: t\nACTION: a\nGOAL: g\n@file:\"/data/sales.csv\" { permission: \"read\" }",
    )
    .await;

    assert_eq!(
        execution.resolved["file"],
        vec![json!({ "path": "/data/sales.csv", "permission": "read" })]
    );
}

#[tokio::test]
async fn test_diagnostics_point_at_reference_spans() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_fn("db", |_| Err(anyhow!("connection refused")))
        .unwrap();

    let source = "TASK: t\nACTION: a\nGOAL: g\n@db:sales{ q }\n  @mail{ q }";
    let (document, _) = crate::parser::parse_source(source);
    let locations: Vec<Span> = document.references.iter().map(|r| r.span).collect();

    let execution = Interpreter::new(&registry)
        .with_locations(&locations)
        .execute(&form(source), &Map::new(), ExecutionLog::new())
        .await;

    let positions: Vec<_> = execution
        .diagnostics
        .iter()
        .map(|d| (d.code.as_str(), d.line, d.column))
        .collect();
    assert_eq!(
        positions,
        vec![
            (E_RESOLVER, Some(4), Some(1)),
            (W_UNRESOLVED_REF, Some(5), Some(3)),
        ]
    );
}

#[tokio::test]
async fn test_without_locations_diagnostics_have_no_position() {
    let registry = CapabilityRegistry::new();
    let execution = execute(&registry, "TASK: t\nACTION: a\nGOAL: g\n@x{ q }").await;
    assert_eq!(execution.diagnostics[0].line, None);
}

#[tokio::test]
async fn test_blocks_are_not_evaluated() {
    let mut registry = CapabilityRegistry::new();
    registry.register_fn("tool", |_| Ok(json!("ran"))).unwrap();

    let source = "TASK: t\nACTION: a\nGOAL: g\nIF x = 1 THEN\n  @tool:a{ q }\nELSE\n  @tool:b{ q }\nEND\nCALL API crm.push WITH {id: 1}";
    let execution = execute(&registry, source).await;

    assert_eq!(
        &execution.log.entries()[2..],
        &["resolved: tool:a", "resolved: tool:b"]
    );
}

#[test]
fn test_execution_log_serializes_as_list() {
    let mut log = ExecutionLog::new();
    log.push("validate: ok");
    assert_eq!(serde_json::to_value(&log).unwrap(), json!(["validate: ok"]));
    assert_eq!(log.into_entries(), vec!["validate: ok".to_string()]);
}
