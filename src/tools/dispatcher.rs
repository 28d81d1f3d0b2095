//! Transport-independent tool dispatch.
//!
//! `invoke` is the only entry point used by both the persistent and the
//! stateless ingress paths: admission token, cache lookup, handler, cache
//! store. Concurrent identical invocations share one computation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::rate_limit::TokenBucket;
use super::registry::{ToolHandler, ToolInfo, ToolRegistry};
use crate::cache::{fingerprint, ResultCache};
use crate::protocol::ToolError;
use crate::server::metrics;

pub type DispatchResult = Result<Value, ToolError>;

type InFlight = Shared<BoxFuture<'static, DispatchResult>>;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    limiter: Arc<TokenBucket>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

fn lock_in_flight(
    in_flight: &Mutex<HashMap<String, InFlight>>,
) -> MutexGuard<'_, HashMap<String, InFlight>> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

fn handler_error(err: anyhow::Error) -> ToolError {
    match err.downcast::<ToolError>() {
        Ok(tool_error) => tool_error,
        Err(other) => ToolError::Internal(format!("{:#}", other)),
    }
}

/// Runs the handler on its own task so it completes even if every caller
/// goes away, and so a panic surfaces as `Internal`.
async fn run_handler(name: String, handler: ToolHandler, params: Value) -> DispatchResult {
    match tokio::spawn(async move { handler(params).await }).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            let err = handler_error(e);
            debug!("Tool {} failed: {}", name, err);
            Err(err)
        }
        Err(join_error) => {
            warn!("Tool {} handler aborted: {}", name, join_error);
            Err(ToolError::Internal(format!("handler for {} aborted", name)))
        }
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<ResultCache>,
        limiter: Arc<TokenBucket>,
    ) -> Self {
        Self {
            registry,
            cache,
            limiter,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Number of distinct computations currently running.
    pub fn in_flight_count(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    pub async fn invoke(&self, name: &str, params: Value) -> DispatchResult {
        let started = Instant::now();
        let result = self.dispatch(name, params).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::NotFound(_)) => "not_found",
            Err(ToolError::InvalidRequest(_)) => "invalid_request",
            Err(_) => "error",
        };
        // Unregistered names share one label.
        let label = if self.registry.contains(name) {
            name
        } else {
            metrics::UNKNOWN_TOOL_LABEL
        };
        metrics::record_tool_invocation(label, outcome, started.elapsed());
        result
    }

    async fn dispatch(&self, name: &str, params: Value) -> DispatchResult {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let params = match params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => params,
            _ => {
                return Err(ToolError::InvalidRequest(
                    "params must be an object".to_string(),
                ))
            }
        };

        self.limiter.acquire(1).await;

        let Some(ttl) = tool.cache_policy.ttl(self.cache.default_ttl()) else {
            return run_handler(name.to_string(), tool.handler.clone(), params).await;
        };

        let key = fingerprint(name, &params);
        if let Some(value) = self.cache.get(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let computation = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!("Joining in-flight computation for {}", key);
                    existing.clone()
                }
                None => {
                    let computation = self.compute(name, tool.handler.clone(), key.clone(), params, ttl);
                    in_flight.insert(key, computation.clone());
                    computation
                }
            }
        };

        computation.await
    }

    fn compute(
        &self,
        name: &str,
        handler: ToolHandler,
        key: String,
        params: Value,
        ttl: std::time::Duration,
    ) -> InFlight {
        let name = name.to_string();
        let task_name = name.clone();
        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();

        // Store and cleanup happen on the task, so they outlive every waiter.
        let task = tokio::spawn(async move {
            let result = run_handler(task_name, handler, params).await;
            if let Ok(value) = &result {
                cache.set(&key, value.clone(), ttl).await;
            }
            lock_in_flight(&in_flight).remove(&key);
            result
        });

        async move {
            task.await.unwrap_or_else(|join_error| {
                warn!("Dispatch of {} aborted: {}", name, join_error);
                Err(ToolError::Internal(format!("dispatch for {} aborted", name)))
            })
        }
        .boxed()
        .shared()
    }
}
