//! Service definitions: typed handler closures and the context they run in.

use crate::metadata::Metadata;
use crate::receive::{ReceiveStream, Streaming};
use crate::registry::{Cardinality, MethodDescriptor};
use crate::send::SendStream;
use crate::status::Status;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type-erased handler: consumes the request stream and fills the response
/// stream.
pub(crate) type Handler = Arc<dyn Fn(ServerCall) + Send + Sync>;

/// Everything a handler invocation owns.
pub(crate) struct ServerCall {
    pub recv: Arc<ReceiveStream>,
    pub send: Arc<SendStream>,
    pub context: ServerContext,
}

impl ServerCall {
    fn single_request<Req: prost::Message + Default>(&self) -> Result<Req, Status> {
        match self.recv.consume::<Req>().next() {
            Some(result) => result,
            None => Err(Status::internal("missing request message")),
        }
    }
}

/// Per-call information handed to handlers.
pub struct ServerContext {
    method: String,
    metadata: Metadata,
    deadline: Option<Instant>,
    peer: Option<SocketAddr>,
    send: Arc<SendStream>,
}

impl ServerContext {
    pub(crate) fn new(
        method: String,
        metadata: Metadata,
        deadline: Option<Instant>,
        peer: Option<SocketAddr>,
        send: Arc<SendStream>,
    ) -> Self {
        Self {
            method,
            metadata,
            deadline,
            peer,
            send,
        }
    }

    /// The request path, e.g. `/pkg.Service/Method`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request metadata, without reserved headers.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// True once the call was cancelled, timed out, or lost its connection.
    ///
    /// Long-running handlers should poll this and give up early.
    pub fn is_cancelled(&self) -> bool {
        self.send.is_closed()
    }

    /// Add a response header. Ignored once headers are on the wire.
    pub fn set_header(&self, name: &str, value: impl Into<Bytes>) {
        let value = value.into();
        self.send.update_headers(|h| h.append(name, value));
    }

    /// Add a trailer sent alongside the status.
    pub fn set_trailer(&self, name: &str, value: impl Into<Bytes>) {
        let value = value.into();
        self.send.update_trailers(|t| t.append(name, value));
    }
}

/// A named group of methods with their handlers.
///
/// ```ignore
/// let service = Service::new("helloworld.Greeter")
///     .unary_unary("SayHello", |req: HelloRequest, _ctx| {
///         Ok(HelloReply { message: format!("Hello {}", req.name) })
///     });
/// ```
pub struct Service {
    name: String,
    methods: Vec<(MethodDescriptor, Handler)>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One request, one response.
    pub fn unary_unary<Req, Resp, F>(self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + 'static,
        F: Fn(Req, &ServerContext) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        self.add::<Req, Resp>(
            method,
            Cardinality::UnaryUnary,
            Arc::new(move |call: ServerCall| {
                let result = call
                    .single_request::<Req>()
                    .and_then(|req| handler(req, &call.context));
                respond_one(&call.send, result);
            }),
        )
    }

    /// One request, a stream of responses.
    pub fn unary_stream<Req, Resp, I, F>(self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + 'static,
        I: IntoIterator<Item = Result<Resp, Status>>,
        F: Fn(Req, &ServerContext) -> Result<I, Status> + Send + Sync + 'static,
    {
        self.add::<Req, Resp>(
            method,
            Cardinality::UnaryStream,
            Arc::new(move |call: ServerCall| {
                let result = call
                    .single_request::<Req>()
                    .and_then(|req| handler(req, &call.context));
                respond_many(&call.send, result);
            }),
        )
    }

    /// A stream of requests, one response.
    pub fn stream_unary<Req, Resp, F>(self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + 'static,
        F: Fn(Streaming<Req>, &ServerContext) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        self.add::<Req, Resp>(
            method,
            Cardinality::StreamUnary,
            Arc::new(move |call: ServerCall| {
                let result = handler(call.recv.consume(), &call.context);
                respond_one(&call.send, result);
            }),
        )
    }

    /// Streams both ways.
    pub fn stream_stream<Req, Resp, I, F>(self, method: &str, handler: F) -> Self
    where
        Req: prost::Message + Default + 'static,
        Resp: prost::Message + 'static,
        I: IntoIterator<Item = Result<Resp, Status>>,
        F: Fn(Streaming<Req>, &ServerContext) -> Result<I, Status> + Send + Sync + 'static,
    {
        self.add::<Req, Resp>(
            method,
            Cardinality::StreamStream,
            Arc::new(move |call: ServerCall| {
                let result = handler(call.recv.consume(), &call.context);
                respond_many(&call.send, result);
            }),
        )
    }

    fn add<Req, Resp>(mut self, method: &str, cardinality: Cardinality, handler: Handler) -> Self {
        let descriptor = MethodDescriptor::new::<Req, Resp>(&*self.name, method, cardinality);
        self.methods.push((descriptor, handler));
        self
    }

    pub(crate) fn into_methods(self) -> Vec<(MethodDescriptor, Handler)> {
        self.methods
    }
}

fn respond_one<Resp: prost::Message + 'static>(send: &SendStream, result: Result<Resp, Status>) {
    match result {
        Ok(response) => {
            // a closed stream means the call was already aborted
            let _ = send.put(response);
            send.close(None);
        }
        Err(status) => send.close(Some(status)),
    }
}

fn respond_many<Resp, I>(send: &SendStream, result: Result<I, Status>)
where
    Resp: prost::Message + 'static,
    I: IntoIterator<Item = Result<Resp, Status>>,
{
    match result {
        Ok(responses) => send.populate(responses),
        Err(status) => send.close(Some(status)),
    }
}
