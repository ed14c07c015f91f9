//! Header rewriting for requests and responses.
//!
//! Rules run in a fixed order per direction: add (append), then set
//! (overwrite), then remove. Request rules run before the request is
//! forwarded; response rules run once the inner chain has answered.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::schema::{HeaderRulesConfig, HeadersConfig};
use crate::error::ProxyError;

/// One direction's parsed rules.
#[derive(Debug, Default)]
pub struct HeaderRules {
    add: Vec<(HeaderName, HeaderValue)>,
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl HeaderRules {
    pub fn from_config(config: &HeaderRulesConfig) -> Result<Self, ProxyError> {
        let pairs = |map: &std::collections::BTreeMap<String, String>| {
            map.iter()
                .map(|(name, value)| Ok((parse_name(name)?, parse_value(name, value)?)))
                .collect::<Result<Vec<_>, ProxyError>>()
        };

        Ok(Self {
            add: pairs(&config.add)?,
            set: pairs(&config.set)?,
            remove: config
                .remove
                .iter()
                .map(|name| parse_name(name))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.add {
            headers.append(name.clone(), value.clone());
        }
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
        for name in &self.remove {
            headers.remove(name);
        }
    }
}

fn parse_name(name: &str) -> Result<HeaderName, ProxyError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| ProxyError::Middleware {
        kind: "headers",
        reason: format!("invalid header name `{name}`"),
    })
}

fn parse_value(name: &str, value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|_| ProxyError::Middleware {
        kind: "headers",
        reason: format!("invalid value for `{name}`"),
    })
}

/// Request and response rules of one `headers` middleware.
#[derive(Debug, Default)]
pub struct HeaderRewrite {
    request: HeaderRules,
    response: HeaderRules,
}

impl HeaderRewrite {
    pub fn new(config: &HeadersConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            request: HeaderRules::from_config(&config.request)?,
            response: HeaderRules::from_config(&config.response)?,
        })
    }
}

pub async fn headers_middleware(
    State(rewrite): State<Arc<HeaderRewrite>>,
    mut request: Request,
    next: Next,
) -> Response {
    rewrite.request.apply(request.headers_mut());
    let mut response = next.run(request).await;
    rewrite.response.apply(response.headers_mut());
    response
}
