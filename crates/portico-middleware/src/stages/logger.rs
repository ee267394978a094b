//! Logging middleware.
//!
//! Writes one line when a request enters the stack and one when its
//! response leaves, through the endpoint's context logger so the lines
//! carry the request's accumulated fields.

use portico_core::{LogField, RequestContext, ServerHttpRequest, ServerHttpResponse};
use serde::{Deserialize, Serialize};

use crate::member::{BoxFuture, HttpMember};
use crate::shared::SharedState;

/// Message written on the way in.
pub const INCOMING_MESSAGE: &str = "Incoming Request";

/// Message written on the way out.
pub const OUTGOING_MESSAGE: &str = "Outgoing Response";

/// Options of [`LoggerMiddleware`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggerOptions {
    /// Adds the inbound path to the incoming line.
    #[serde(default)]
    pub log_path: bool,
}

/// Middleware that logs request entry and response exit.
#[derive(Debug, Clone, Default)]
pub struct LoggerMiddleware {
    options: LoggerOptions,
}

impl LoggerMiddleware {
    /// Name of the shared-state slot.
    pub const NAME: &'static str = "logger";

    /// Creates the middleware.
    #[must_use]
    pub fn new(options: LoggerOptions) -> Self {
        Self { options }
    }
}

impl HttpMember for LoggerMiddleware {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn json_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "$schema": "http://json-schema.org/draft-04/schema#",
            "type": "object",
            "properties": {
                "logPath": { "type": "boolean" }
            },
            "additionalProperties": false
        })
    }

    fn handle_request<'a>(
        &'a self,
        ctx: RequestContext,
        req: &'a mut ServerHttpRequest,
        _res: &'a ServerHttpResponse,
        _shared: &'a mut SharedState,
    ) -> BoxFuture<'a, (RequestContext, bool)> {
        Box::pin(async move {
            let mut fields = Vec::new();
            if self.options.log_path {
                fields.push(LogField::string("path", req.path()));
            }
            req.endpoint().logger.info(&ctx, INCOMING_MESSAGE, fields);
            (ctx, true)
        })
    }

    fn handle_response<'a>(
        &'a self,
        ctx: RequestContext,
        res: &'a ServerHttpResponse,
        _shared: &'a mut SharedState,
    ) -> BoxFuture<'a, RequestContext> {
        Box::pin(async move {
            res.endpoint().logger.info(
                &ctx,
                OUTGOING_MESSAGE,
                vec![LogField::int("statusCode", i64::from(res.status().as_u16()))],
            );
            ctx
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::fixtures::{endpoint_with_sink, MemoryLogSink, TestRequest};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logs_both_directions() {
        let sink = MemoryLogSink::new();
        let endpoint = Arc::new(endpoint_with_sink("bar", "foo", &sink));
        let mut req = TestRequest::get("/bar/foo").build(endpoint);
        let res = req.response();
        let mut shared = SharedState::new([LoggerMiddleware::NAME]);
        let mw = LoggerMiddleware::new(LoggerOptions { log_path: true });

        let (ctx, proceed) = mw
            .handle_request(req.context().clone(), &mut req, &res, &mut shared)
            .await;
        assert!(proceed);
        let _ = mw.handle_response(ctx, &res, &mut shared).await;

        let incoming = sink.find(INCOMING_MESSAGE).unwrap();
        assert_eq!(incoming.field("path").unwrap(), "/bar/foo");
        assert_eq!(incoming.field("endpointID").unwrap(), "bar");
        assert_eq!(sink.find(OUTGOING_MESSAGE).unwrap().field("statusCode").unwrap(), 200);
    }

    #[test]
    fn test_options_schema() {
        let mw = LoggerMiddleware::default();
        assert_eq!(mw.json_schema()["properties"]["logPath"]["type"], "boolean");
        let options: LoggerOptions = serde_json::from_str(r#"{"logPath":true}"#).unwrap();
        assert!(options.log_path);
        assert!(serde_json::from_str::<LoggerOptions>(r#"{"other":1}"#).is_err());
    }
}
