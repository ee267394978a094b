//! Method table of the channel-protocol server.
//!
//! Calls name their target as `Service::method`. Each registered method
//! owns a [`ChannelEndpoint`]: its descriptor, its handler stack and an
//! optional post-response callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use portico_core::{EndpointInfo, LogField, RequestContext, SystemErrorCode};
use portico_middleware::{ChannelResponse, ChannelStack};

use crate::buffer_pool::BufferPool;
use crate::defaults::EndpointDefaults;
use crate::error::{ServerError, ServerResult};
use crate::frame::{CallFrame, ErrorFrame, Frame};
use crate::inbound_call;

/// Called after a response frame has been built, with the final context,
/// the method name and the response.
pub type PostResponseFn = Arc<dyn Fn(&RequestContext, &str, &ChannelResponse) + Send + Sync>;

/// One registered channel method.
#[derive(Clone)]
pub struct ChannelEndpoint {
    pub(crate) info: Arc<EndpointInfo>,
    pub(crate) stack: Arc<ChannelStack>,
    pub(crate) post_response: Option<PostResponseFn>,
}

impl ChannelEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(info: EndpointInfo, stack: ChannelStack) -> Self {
        Self {
            info: Arc::new(info),
            stack: Arc::new(stack),
            post_response: None,
        }
    }

    /// Sets the post-response callback.
    #[must_use]
    pub fn with_post_response(
        mut self,
        callback: impl Fn(&RequestContext, &str, &ChannelResponse) + Send + Sync + 'static,
    ) -> Self {
        self.post_response = Some(Arc::new(callback));
        self
    }

    /// Returns the descriptor.
    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }
}

impl fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("endpoint", &self.info.qualified_name())
            .field("method", &self.info.method)
            .field("post_response", &self.post_response.is_some())
            .finish()
    }
}

/// Splits `Service::method`. Both halves must be non-empty.
#[must_use]
pub fn parse_method(name: &str) -> Option<(&str, &str)> {
    let (service, method) = name.split_once("::")?;
    if service.is_empty() || method.is_empty() || method.contains("::") {
        return None;
    }
    Some((service, method))
}

/// Routes inbound calls to their endpoints by method name.
#[derive(Debug, Default)]
pub struct ChannelRouter {
    endpoints: HashMap<String, ChannelEndpoint>,
    defaults: EndpointDefaults,
}

impl ChannelRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new(defaults: EndpointDefaults) -> Self {
        Self {
            endpoints: HashMap::new(),
            defaults,
        }
    }

    /// Registers `stack` under `service_method`.
    pub fn register(
        &mut self,
        service_method: &str,
        endpoint_id: &str,
        handler_id: &str,
        stack: ChannelStack,
    ) -> ServerResult<()> {
        let info = self.defaults.endpoint(endpoint_id, handler_id, service_method);
        self.handle(service_method, ChannelEndpoint::new(info, stack))
    }

    /// Registers a prepared endpoint under `service_method`.
    pub fn handle(&mut self, service_method: &str, endpoint: ChannelEndpoint) -> ServerResult<()> {
        if parse_method(service_method).is_none() {
            return Err(ServerError::MalformedMethod(service_method.to_string()));
        }
        if self.endpoints.contains_key(service_method) {
            return Err(ServerError::DuplicateMethod(service_method.to_string()));
        }
        self.endpoints.insert(service_method.to_string(), endpoint);
        Ok(())
    }

    /// Returns the endpoint registered under `service_method`.
    #[must_use]
    pub fn get(&self, service_method: &str) -> Option<&ChannelEndpoint> {
        self.endpoints.get(service_method)
    }

    /// Returns the registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Returns the shared endpoint collaborators.
    #[must_use]
    pub fn defaults(&self) -> &EndpointDefaults {
        &self.defaults
    }

    /// Runs one call and returns the frame to write back, if any.
    ///
    /// Unknown and malformed methods are answered with a bad-request
    /// error frame. `None` means the call's deadline passed and the
    /// caller has already given up on it.
    pub async fn dispatch(&self, call: CallFrame, pool: &BufferPool) -> Option<Frame> {
        match self.endpoints.get(&call.method) {
            Some(endpoint) => inbound_call::handle_call(endpoint, call, pool).await,
            None => {
                let message = if parse_method(&call.method).is_some() {
                    format!("no handler for channel method '{}'", call.method)
                } else {
                    format!("malformed channel method '{}'", call.method)
                };
                self.defaults.logger.warn(
                    &RequestContext::new(),
                    "Rejected an incoming channel call",
                    vec![
                        LogField::string("method", call.method.as_str()),
                        LogField::string("reason", message.as_str()),
                    ],
                );
                Some(Frame::Error(ErrorFrame::new(
                    call.id,
                    SystemErrorCode::BadRequest,
                    message,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use portico_middleware::{channel_handler_fn, ChannelResponse};
    use std::time::Duration;

    fn noop_stack() -> ChannelStack {
        ChannelStack::bare(channel_handler_fn(|ctx, _req| {
            Box::pin(async move { Ok((ctx, ChannelResponse::empty())) })
        }))
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("Bar::echo"), Some(("Bar", "echo")));
        assert_eq!(parse_method("Bar::"), None);
        assert_eq!(parse_method("::echo"), None);
        assert_eq!(parse_method("Bar.echo"), None);
        assert_eq!(parse_method("A::b::c"), None);
    }

    #[test]
    fn test_register_rejects_malformed_and_duplicate_methods() {
        let mut router = ChannelRouter::default();
        router.register("Bar::echo", "bar", "echo", noop_stack()).unwrap();

        let err = router.register("Bar::echo", "bar", "echo", noop_stack()).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateMethod(_)));

        let err = router.register("echo", "bar", "echo", noop_stack()).unwrap_err();
        assert!(matches!(err, ServerError::MalformedMethod(_)));

        assert_eq!(router.methods(), vec!["Bar::echo"]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_a_bad_request() {
        let router = ChannelRouter::default();
        let call = CallFrame {
            id: 9,
            method: "Missing::call".to_string(),
            ttl: Duration::ZERO,
            arg2: Bytes::new(),
            arg3: Bytes::new(),
        };

        match router.dispatch(call, &BufferPool::new(1)).await {
            Some(Frame::Error(frame)) => {
                assert_eq!(frame.id, 9);
                assert_eq!(frame.code, SystemErrorCode::BadRequest);
                assert!(frame.message.contains("Missing::call"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
