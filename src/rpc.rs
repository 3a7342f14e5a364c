use crate::batch::{BatchRequest, BatchSummary, validate_batch};
use crate::config::Config;
use crate::error::{SourceKind, ValidateError};
use crate::reach::check_reachability;
use crate::resolve::Resolver;
use crate::root::extract_root;
use crate::scope::ProjectScope;
use crate::source::Sources;
use crate::validate::{OptionOverrides, ValidateOptions, Validator};
use crate::verify::verify_flow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::time::Instant;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    /// flow_not_found, no_root_found, source_unavailable, invalid_options,
    /// invalid_params, unknown_method or internal
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<SourceKind>,
    message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown method: {0}")]
struct UnknownMethod(String);

#[derive(Deserialize, schemars::JsonSchema)]
struct ExtractRootParams {
    flow_key: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ResolveParams {
    #[serde(alias = "candidate", alias = "name")]
    symbol: String,
    class_hint: Option<String>,
    class_prefixes: Option<Vec<String>>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct VerifyParams {
    flow_key: String,
    /// Top-level directory to scope symbols to; derived from the root file
    /// when absent
    scope: Option<String>,
    class_prefixes: Option<Vec<String>>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ReachabilityParams {
    /// Function names to start from
    #[serde(alias = "root")]
    roots: Vec<String>,
    target: String,
    #[serde(flatten)]
    options: OptionOverrides,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ValidateParams {
    flow_key: String,
    target: String,
    #[serde(flatten)]
    options: OptionOverrides,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ValidateBatchParams {
    requests: Vec<BatchRequest>,
    #[serde(flatten)]
    options: OptionOverrides,
}

const METHODS: &[(&str, &str)] = &[
    ("help", "Describe the available methods"),
    ("overview", "Counts, languages and fingerprint of the loaded store"),
    ("extract_root", "Pick the participant a flow starts from"),
    ("resolve", "Map a symbol onto indexed functions through the fallback chain"),
    ("reachability", "Walk call edges from root names to a target"),
    ("verify", "Classify a flow's declared calls as confirmed, phantom or missing"),
    ("validate", "Extract, resolve and walk in one request; returns a full report"),
    ("validate_batch", "Validate many (flow_key, target) pairs in parallel"),
];

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
}

/// JSON Schema for the params of `method`, or null for parameterless ones.
pub fn method_param_schema(method: &str) -> Value {
    match method {
        "extract_root" => schema_value::<ExtractRootParams>(),
        "resolve" => schema_value::<ResolveParams>(),
        "reachability" => schema_value::<ReachabilityParams>(),
        "verify" => schema_value::<VerifyParams>(),
        "validate" => schema_value::<ValidateParams>(),
        "validate_batch" => schema_value::<ValidateBatchParams>(),
        _ => Value::Null,
    }
}

pub fn method_names() -> Vec<&'static str> {
    METHODS.iter().map(|(name, _)| *name).collect()
}

fn method_help() -> Value {
    let methods: Vec<Value> = METHODS
        .iter()
        .map(|(name, summary)| {
            json!({
                "name": name,
                "summary": summary,
                "params": method_param_schema(name),
            })
        })
        .collect();
    json!({
        "summary": "flowtrust checks claimed execution flows against a static call index and serves JSONL RPC over stdin/stdout.",
        "methods": methods,
        "error_kinds": [
            "flow_not_found",
            "no_root_found",
            "source_unavailable",
            "invalid_options",
            "invalid_params",
            "unknown_method",
            "internal"
        ],
    })
}

fn base_options() -> ValidateOptions {
    ValidateOptions::from_config(Config::get())
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() { json!({}) } else { params };
    Ok(serde_json::from_value(params)?)
}

pub fn handle_method(sources: &Sources, method: &str, params: Value) -> Result<Value> {
    let start = Instant::now();
    let value = match method {
        "help" => method_help(),
        "overview" => json!(sources.index.overview().map_err(ValidateError::index_unavailable)?),
        "extract_root" => {
            let params: ExtractRootParams = parse_params(params)?;
            json!(extract_root(sources.flows.as_ref(), &params.flow_key)?)
        }
        "resolve" => {
            let params: ResolveParams = parse_params(params)?;
            let prefixes = params
                .class_prefixes
                .unwrap_or_else(|| Config::get().class_prefixes.clone());
            let resolver = Resolver::standard(&prefixes);
            json!(resolver.resolve(
                sources.index.as_ref(),
                &params.symbol,
                params.class_hint.as_deref()
            )?)
        }
        "reachability" => {
            let params: ReachabilityParams = parse_params(params)?;
            let options = params.options.apply(base_options());
            options.check()?;
            json!(check_reachability(
                sources.index.as_ref(),
                &params.roots,
                &params.target,
                &options.reach_options()
            )?)
        }
        "verify" => {
            let params: VerifyParams = parse_params(params)?;
            let prefixes = params
                .class_prefixes
                .unwrap_or_else(|| Config::get().class_prefixes.clone());
            let index = sources.index.as_ref();
            let scope = match params.scope.as_deref() {
                Some(prefix) => ProjectScope::from_prefix(prefix),
                None => {
                    let root = extract_root(sources.flows.as_ref(), &params.flow_key)?;
                    ProjectScope::derive(index, &root.file_path)?
                }
            };
            json!(verify_flow(
                index,
                sources.flows.as_ref(),
                &Resolver::standard(&prefixes),
                &params.flow_key,
                scope.as_ref()
            )?)
        }
        "validate" => {
            let params: ValidateParams = parse_params(params)?;
            let options = params.options.apply(base_options());
            let validator =
                Validator::new(sources.index.as_ref(), sources.flows.as_ref(), options)?;
            json!(validator.validate(&params.flow_key, &params.target)?)
        }
        "validate_batch" => {
            let params: ValidateBatchParams = parse_params(params)?;
            let options = params.options.apply(base_options());
            let outcomes = validate_batch(
                sources.index.as_ref(),
                sources.flows.as_ref(),
                &params.requests,
                &options,
            )?;
            json!({
                "summary": BatchSummary::of(&outcomes),
                "results": outcomes,
            })
        }
        other => return Err(UnknownMethod(other.to_string()).into()),
    };
    tracing::debug!(
        method,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "rpc method handled"
    );
    Ok(value)
}

fn error_response(id: Value, err: &anyhow::Error) -> RpcResponse {
    let (kind, source) = if let Some(validate) = err.downcast_ref::<ValidateError>() {
        (validate.kind(), validate.source_kind())
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        ("invalid_params", None)
    } else if err.downcast_ref::<UnknownMethod>().is_some() {
        ("unknown_method", None)
    } else {
        ("internal", None)
    };
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            kind: kind.to_string(),
            source,
            message: format!("{err:#}"),
        }),
    }
}

fn handle_request(sources: &Sources, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    match handle_method(sources, &req.method, req.params) {
        Ok(value) => RpcResponse {
            id,
            result: Some(value),
            error: None,
        },
        Err(err) => {
            tracing::warn!(method = %req.method, "rpc request failed: {err:#}");
            error_response(id, &err)
        }
    }
}

fn invalid_request(message: String) -> RpcResponse {
    RpcResponse {
        id: Value::Null,
        result: None,
        error: Some(RpcError {
            kind: "invalid_request".to_string(),
            source: None,
            message,
        }),
    }
}

pub fn serve(sources: Sources) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_request(&sources, request),
            Err(err) => invalid_request(format!("invalid request: {err}")),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

/// One request, one response line.
pub fn call(sources: &Sources, method: String, params_raw: &str, id_raw: &str) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let request = RpcRequest { id, method, params };
    let response = handle_request(sources, request);
    Ok(serde_json::to_string(&response)?)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
