//! Tool registry: the static map from tool name to schema, handler
//! binding and policies.
//!
//! The registry is assembled once at startup from the catalog and is
//! immutable afterwards, so read access needs no synchronization. Every
//! invocation performs schema validation first, then interprets the
//! tool's [`ToolBinding`] against the resilience pipeline. Handler
//! behavior is data, not code: a binding describes how arguments map
//! onto upstream paths, query strings and bodies, so cache policy and
//! idempotency handling stay uniform across the whole catalog.

use crate::models::error::GatewayError;
use crate::models::frame::Frame;
use crate::models::tool::{CachePolicy, ToolClass, ToolDescriptor};
use crate::logs::events;
use crate::services::pipeline::{CacheDirective, CallContext, PipelineRequest, ResiliencePipeline};
use crate::services::upstream::UpstreamRequest;
use crate::utils::cancel::CancelToken;
use crate::utils::canonical::argument_hash;
use log::Level;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How a tool's normalized arguments become upstream traffic.
///
/// `{name}` segments in a path are substituted from (and consume) the
/// matching argument; what remains becomes the query string for reads
/// and the JSON body for writes.
#[derive(Debug, Clone)]
pub enum ToolBinding {
    /// Collection read; `filter`/`limit` map to the upstream's
    /// `_filter`/`_limit` parameters.
    List { service: &'static str, path: &'static str },
    /// Single-record read; upstream 404 becomes a semantic
    /// `{"found": false}` result.
    Get { service: &'static str, path: &'static str },
    Create { service: &'static str, path: &'static str },
    Update { service: &'static str, path: &'static str },
    /// Idempotent delete; 404 acknowledges as already gone.
    Delete { service: &'static str, path: &'static str },
    /// Composite document POSTed to a consolidated endpoint, with
    /// progress notifications around the submission.
    Compound { service: &'static str, path: &'static str },
    /// Derived read: joins the subnet collection with the address
    /// collection and computes per-subnet utilization.
    SubnetUtilization {
        service: &'static str,
        subnet_path: &'static str,
        address_path: &'static str,
    },
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub binding: ToolBinding,
}

/// Context for one tool invocation, threaded in from the transport.
#[derive(Debug)]
pub struct InvokeContext {
    /// Wire correlation id of the `call_tool` frame.
    pub call_id: String,
    pub session_id: String,
    pub correlation_id: String,
    pub parent_span_id: Option<String>,
    pub cancel: CancelToken,
    /// Sink for `progress` frames; bounded, so a stalled client
    /// backpressures the handler rather than ballooning memory.
    pub progress: Option<mpsc::Sender<Frame>>,
}

impl InvokeContext {
    fn pipeline_ctx(&self) -> CallContext {
        CallContext {
            correlation_id: self.correlation_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            cancel: self.cancel.clone(),
        }
    }

    async fn progress(&self, message: &str, percent: u8) {
        if let Some(sender) = &self.progress {
            let _ = sender
                .send(Frame::Progress {
                    id: self.call_id.clone(),
                    session_id: self.session_id.clone(),
                    message: message.to_string(),
                    percent: Some(percent),
                })
                .await;
        }
    }
}

/// Registry-wide defaults resolved from configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub default_cache_ttl: Duration,
    pub default_deadline: Duration,
}

/// The immutable tool registry.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    pipeline: Arc<ResiliencePipeline>,
    config: RegistryConfig,
}

impl ToolRegistry {
    /// Assembles the registry from a set of entries.
    ///
    /// # Panics
    ///
    /// Panics on duplicate tool names or on a mutation tool declaring
    /// a TTL policy. Both are construction bugs, caught before the
    /// gateway accepts traffic.
    pub fn new(
        entries: Vec<RegisteredTool>,
        pipeline: Arc<ResiliencePipeline>,
        config: RegistryConfig,
    ) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let name = entry.descriptor.name.clone();
            assert!(
                index.insert(name.clone(), position).is_none(),
                "duplicate tool name '{}' in catalog",
                name
            );
            assert!(
                entry.descriptor.classification == ToolClass::Read
                    || matches!(entry.descriptor.cache_policy, CachePolicy::None),
                "mutation tool '{}' must not declare a cache TTL",
                name
            );
        }
        Self { tools: entries, index, pipeline, config }
    }

    /// Full catalog for `list_tools_result`.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|i| &self.tools[*i].descriptor)
    }

    /// Validates arguments and dispatches the tool.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Value,
        ctx: InvokeContext,
    ) -> Result<Value, GatewayError> {
        let tool = self
            .index
            .get(name)
            .map(|i| &self.tools[*i])
            .ok_or_else(|| GatewayError::UnknownTool { name: name.to_string() })?;

        let args = tool.descriptor.input_schema.validate(arguments)?;
        events::emit(
            Level::Info,
            "tool_invoked",
            &ctx.correlation_id,
            &[
                ("tool", json!(name)),
                ("session", json!(ctx.session_id)),
                (
                    "classification",
                    json!(match tool.descriptor.classification {
                        ToolClass::Read => "read",
                        ToolClass::Mutate => "mutate",
                    }),
                ),
            ],
        );

        let hash = argument_hash(&args);
        let cache = tool
            .descriptor
            .cache_policy
            .effective_ttl(self.config.default_cache_ttl.as_secs())
            .filter(|_| tool.descriptor.classification == ToolClass::Read)
            .map(|ttl| CacheDirective { argument_hash: hash, ttl: Duration::from_secs(ttl) });
        let deadline = tool
            .descriptor
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_deadline);

        let result = self
            .dispatch(tool, args, hash, cache, deadline, &ctx)
            .await;
        if let Err(error) = &result {
            events::emit(
                Level::Warn,
                "tool_failed",
                &ctx.correlation_id,
                &[
                    ("tool", json!(name)),
                    ("session", json!(ctx.session_id)),
                    ("error_kind", json!(error.kind())),
                ],
            );
        }
        result
    }

    async fn dispatch(
        &self,
        tool: &RegisteredTool,
        args: Map<String, Value>,
        hash: u64,
        cache: Option<CacheDirective>,
        deadline: Duration,
        ctx: &InvokeContext,
    ) -> Result<Value, GatewayError> {
        let name = &tool.descriptor.name;
        let pipeline_ctx = ctx.pipeline_ctx();
        match &tool.binding {
            ToolBinding::List { service, path } => {
                let (path, rest) = substitute_path(path, args)?;
                let mut request = UpstreamRequest::get(*service, path);
                for (key, value) in rest {
                    let upstream_key = match key.as_str() {
                        "filter" => "_filter".to_string(),
                        "limit" => "_limit".to_string(),
                        other => other.to_string(),
                    };
                    request = request.with_query(&upstream_key, scalar_string(&value));
                }
                self.pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache, deadline },
                        &pipeline_ctx,
                    )
                    .await
            }
            ToolBinding::Get { service, path } => {
                let (path, rest) = substitute_path(path, args)?;
                let mut request = UpstreamRequest::get(*service, path);
                for (key, value) in rest {
                    request = request.with_query(&key, scalar_string(&value));
                }
                let outcome = self
                    .pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache, deadline },
                        &pipeline_ctx,
                    )
                    .await;
                translate_not_found(outcome)
            }
            ToolBinding::Create { service, path } => {
                let (path, body) = substitute_path(path, args)?;
                let request = UpstreamRequest::post(*service, path, Value::Object(body))
                    .with_idempotency_key(idempotency_key(name, hash));
                self.pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache: None, deadline },
                        &pipeline_ctx,
                    )
                    .await
            }
            ToolBinding::Update { service, path } => {
                let (path, body) = substitute_path(path, args)?;
                let request = UpstreamRequest::patch(*service, path, Value::Object(body))
                    .with_idempotency_key(idempotency_key(name, hash));
                self.pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache: None, deadline },
                        &pipeline_ctx,
                    )
                    .await
            }
            ToolBinding::Delete { service, path } => {
                let (path, _rest) = substitute_path(path, args)?;
                let request = UpstreamRequest::delete(*service, path)
                    .with_idempotency_key(idempotency_key(name, hash));
                let outcome = self
                    .pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache: None, deadline },
                        &pipeline_ctx,
                    )
                    .await;
                match outcome {
                    Err(GatewayError::UpstreamClientError { status: 404, .. }) => {
                        Ok(json!({"deleted": false, "found": false}))
                    }
                    Ok(_) => Ok(json!({"deleted": true})),
                    Err(error) => Err(error),
                }
            }
            ToolBinding::Compound { service, path } => {
                ctx.progress("validating composite document", 10).await;
                let (path, body) = substitute_path(path, args)?;
                ctx.progress("submitting to upstream", 30).await;
                let request = UpstreamRequest::post(*service, path, Value::Object(body))
                    .with_idempotency_key(idempotency_key(name, hash));
                let result = self
                    .pipeline
                    .execute(
                        PipelineRequest { tool: name.clone(), request, cache: None, deadline },
                        &pipeline_ctx,
                    )
                    .await?;
                ctx.progress("upstream accepted configuration", 90).await;
                Ok(result)
            }
            ToolBinding::SubnetUtilization { service, subnet_path, address_path } => {
                // Two cacheable reads joined gateway-side; the tool
                // itself is cacheable because both inputs are.
                let mut subnet_request = UpstreamRequest::get(*service, *subnet_path);
                if let Some(space) = args.get("space") {
                    subnet_request = subnet_request
                        .with_query("_filter", format!("space=='{}'", scalar_string(space)));
                }
                if let Some(limit) = args.get("limit") {
                    subnet_request = subnet_request.with_query("_limit", scalar_string(limit));
                }
                let subnets = self
                    .pipeline
                    .execute(
                        PipelineRequest {
                            tool: name.clone(),
                            request: subnet_request,
                            cache,
                            deadline,
                        },
                        &pipeline_ctx,
                    )
                    .await?;
                // The joined collection reuses the subnet read's cache
                // entry; the address read is keyed separately.
                let address_cache = cache.map(|d| CacheDirective {
                    argument_hash: d.argument_hash.wrapping_add(1),
                    ttl: d.ttl,
                });
                let addresses = self
                    .pipeline
                    .execute(
                        PipelineRequest {
                            tool: name.clone(),
                            request: UpstreamRequest::get(*service, *address_path)
                                .with_query("_limit", 5000),
                            cache: address_cache,
                            deadline,
                        },
                        &pipeline_ctx,
                    )
                    .await?;
                Ok(compute_utilization(&subnets, &addresses))
            }
        }
    }
}

/// Substitutes `{name}` placeholders from the argument map, consuming
/// the used arguments and returning the remainder.
fn substitute_path(
    template: &str,
    mut args: Map<String, Value>,
) -> Result<(String, Map<String, Value>), GatewayError> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let end = rest[start..].find('}').map(|e| start + e).ok_or_else(|| {
            GatewayError::Session { message: format!("malformed path template '{}'", template) }
        })?;
        let key = &rest[start + 1..end];
        let value = args.remove(key).ok_or_else(|| GatewayError::SchemaViolation {
            message: format!("missing path argument '{}'", key),
        })?;
        path.push_str(&scalar_string(&value));
        rest = &rest[end + 1..];
    }
    path.push_str(rest);
    Ok((path, args))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stable mutation fingerprint: a client that resends the same
/// mutation after a lost response produces the same key, so the
/// upstream can recognize the duplicate.
fn idempotency_key(tool: &str, argument_hash: u64) -> String {
    format!("{}-{:016x}", tool, argument_hash)
}

fn translate_not_found(outcome: Result<Value, GatewayError>) -> Result<Value, GatewayError> {
    match outcome {
        Err(GatewayError::UpstreamClientError { status: 404, .. }) => {
            Ok(json!({"found": false, "result": null}))
        }
        Ok(value) => Ok(json!({"found": true, "result": value})),
        Err(error) => Err(error),
    }
}

/// Joins subnets with addresses (matched on the address `parent`
/// field) into per-subnet utilization figures.
fn compute_utilization(subnets: &Value, addresses: &Value) -> Value {
    let empty = Vec::new();
    let subnet_list = subnets
        .get("results")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let address_list = addresses
        .get("results")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut used: HashMap<&str, u64> = HashMap::new();
    for address in address_list {
        if let Some(parent) = address.get("parent").and_then(Value::as_str) {
            *used.entry(parent).or_insert(0) += 1;
        }
    }

    let results: Vec<Value> = subnet_list
        .iter()
        .map(|subnet| {
            let id = subnet.get("id").and_then(Value::as_str).unwrap_or("");
            let address = subnet.get("address").and_then(Value::as_str).unwrap_or("");
            let cidr = subnet.get("cidr").and_then(Value::as_u64).unwrap_or(0);
            let capacity: u64 = if cidr > 0 && cidr < 31 {
                (1u64 << (32 - cidr)).saturating_sub(2)
            } else {
                0
            };
            let used_count = used.get(id).copied().unwrap_or(0);
            let utilization = if capacity > 0 {
                (used_count as f64 / capacity as f64) * 100.0
            } else {
                0.0
            };
            json!({
                "id": id,
                "address": address,
                "cidr": cidr,
                "capacity": capacity,
                "used": used_count,
                "utilization_percent": (utilization * 100.0).round() / 100.0,
            })
        })
        .collect();
    json!({ "results": results })
}
