use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use folio_core::error::{FolioError, Result};
use folio_core::traits::{InvocationContext, OperationInvoker};
use folio_core::ValueStore;
use folio_index::{OperationSpec, ServiceSpec};

const ERROR_BODY_LIMIT: usize = 500;

/// Prefix under which request parameters are kept in the value store.
pub const PARAM_PREFIX: &str = "params.";

/// Calls one handbook operation over HTTP.
///
/// `{name}` path placeholders are filled from the input object, falling back
/// to `params.<name>` in the value store. Remaining input fields go to the
/// query string for GET/DELETE and to a JSON body otherwise.
pub struct HttpOperationInvoker {
    http: Client,
    operation_id: String,
    method: Method,
    base_url: String,
    path: String,
    timeout_secs: u64,
}

/// A resolved request, before sending.
#[derive(Debug, PartialEq)]
pub(crate) struct PreparedCall {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpOperationInvoker {
    pub fn from_spec(http: Client, service: &ServiceSpec, op: &OperationSpec) -> Self {
        Self {
            http,
            operation_id: op.operation_id.clone(),
            method: op
                .method
                .to_uppercase()
                .parse::<Method>()
                .unwrap_or(Method::GET),
            base_url: service.base_url.trim_end_matches('/').to_string(),
            path: op.path.clone(),
            timeout_secs: 30,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn fail(&self, message: impl Into<String>) -> FolioError {
        FolioError::ExecutionFailed {
            operation: self.operation_id.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn prepare(&self, input: Value, values: &ValueStore) -> Result<PreparedCall> {
        let (mut fields, raw_body) = match input {
            Value::Object(map) => (map, None),
            Value::Null => (serde_json::Map::new(), None),
            other => (serde_json::Map::new(), Some(other)),
        };

        let mut path = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|c| open + c)
                .ok_or_else(|| self.fail(format!("unterminated placeholder in {}", self.path)))?;
            let name = &rest[open + 1..close];
            let value = fields
                .remove(name)
                .or_else(|| values.get(&format!("{}{}", PARAM_PREFIX, name)))
                .ok_or_else(|| self.fail(format!("missing path parameter '{}'", name)))?;
            path.push_str(&rest[..open]);
            path.push_str(&scalar_to_string(&value));
            rest = &rest[close + 1..];
        }
        path.push_str(rest);

        let url = format!("{}{}", self.base_url, path);
        let sends_query = self.method == Method::GET || self.method == Method::DELETE;

        if sends_query {
            let query = fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, scalar_to_string(&v)))
                .collect();
            Ok(PreparedCall {
                url,
                query,
                body: None,
            })
        } else {
            let body = raw_body.or_else(|| (!fields.is_empty()).then(|| Value::Object(fields)));
            Ok(PreparedCall {
                url,
                query: Vec::new(),
                body,
            })
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl OperationInvoker for HttpOperationInvoker {
    fn invoke(&self, input: Value, ctx: InvocationContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let call = self.prepare(input, &ctx.values)?;
            debug!(
                operation = %self.operation_id,
                method = %self.method,
                url = %call.url,
                step = ctx.step_index,
                "Invoking HTTP operation"
            );

            let mut req = self.http.request(self.method.clone(), &call.url);
            if !call.query.is_empty() {
                req = req.query(&call.query);
            }
            if let Some(body) = &call.body {
                req = req.json(body);
            }

            let resp = req.send().await.map_err(|e| self.fail(e.to_string()))?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| self.fail(e.to_string()))?;

            if !status.is_success() {
                let snippet: String = text.chars().take(ERROR_BODY_LIMIT).collect();
                return Err(self.fail(format!("HTTP {}: {}", status.as_u16(), snippet)));
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
