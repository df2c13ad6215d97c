//! The `Example` service and a typed client for it.
//!
//! Every method answers with `value` repeated `multiplier` times (once when
//! unset). Streaming responses are numbered by `seqno` from 1.

use grpc::{Call, CallOptions, Channel, Service, ServerContext, Status, Streaming};
use tracing::debug;

pub const SERVICE_NAME: &str = "example.Example";

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExampleRequest {
    #[prost(string, tag = "1")]
    pub value: String,
    #[prost(uint32, optional, tag = "2")]
    pub multiplier: Option<u32>,
    /// Number of responses a server-streaming call sends.
    #[prost(uint32, tag = "3")]
    pub response_count: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExampleResponse {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(uint32, tag = "2")]
    pub seqno: u32,
}

impl ExampleRequest {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            multiplier: None,
            response_count: 1,
        }
    }

    fn expand(&self) -> String {
        self.value.repeat(self.multiplier.unwrap_or(1) as usize)
    }
}

/// Largest response message a single request may ask for.
const MAX_RESPONSE_LEN: usize = 1024 * 1024;

fn respond(request: &ExampleRequest, seqno: u32) -> Result<ExampleResponse, Status> {
    let len = request
        .value
        .len()
        .saturating_mul(request.multiplier.unwrap_or(1) as usize);
    if len > MAX_RESPONSE_LEN {
        return Err(Status::invalid_argument(format!(
            "response of {} bytes exceeds {}",
            len, MAX_RESPONSE_LEN
        )));
    }
    Ok(ExampleResponse {
        message: request.expand(),
        seqno,
    })
}

fn unary_unary(request: ExampleRequest, ctx: &ServerContext) -> Result<ExampleResponse, Status> {
    debug!(method = ctx.method(), value = %request.value, "unary request");
    respond(&request, 1)
}

fn unary_stream(
    request: ExampleRequest,
    _ctx: &ServerContext,
) -> Result<impl Iterator<Item = Result<ExampleResponse, Status>> + use<>, Status> {
    // validate once so an oversized request fails before any message
    respond(&request, 0)?;
    Ok((1..=request.response_count).map(move |seqno| respond(&request, seqno)))
}

fn stream_unary(
    requests: Streaming<ExampleRequest>,
    _ctx: &ServerContext,
) -> Result<ExampleResponse, Status> {
    let mut message = String::new();
    let mut seqno = 0;
    for request in requests {
        message.push_str(&respond(&request?, 0)?.message);
        seqno += 1;
    }
    Ok(ExampleResponse { message, seqno })
}

fn stream_stream(
    requests: Streaming<ExampleRequest>,
    ctx: &ServerContext,
) -> Result<impl Iterator<Item = Result<ExampleResponse, Status>> + use<>, Status> {
    debug!(method = ctx.method(), "bidi stream opened");
    Ok(requests
        .zip(1..)
        .map(|(request, seqno)| respond(&request?, seqno)))
}

/// Build the `Example` service.
pub fn example_service() -> Service {
    Service::new(SERVICE_NAME)
        .unary_unary("UnaryUnary", unary_unary)
        .unary_stream("UnaryStream", unary_stream)
        .stream_unary("StreamUnary", stream_unary)
        .stream_stream("StreamStream", stream_stream)
}

fn path(method: &str) -> String {
    format!("/{}/{}", SERVICE_NAME, method)
}

/// Typed calls to the `Example` service.
#[derive(Clone)]
pub struct ExampleClient {
    channel: Channel,
}

impl ExampleClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn unary_unary(&self, request: ExampleRequest, options: CallOptions) -> Call<ExampleResponse> {
        self.channel.unary_unary(&path("UnaryUnary"), request, options)
    }

    pub fn unary_stream(
        &self,
        request: ExampleRequest,
        options: CallOptions,
    ) -> Call<ExampleResponse> {
        self.channel.unary_stream(&path("UnaryStream"), request, options)
    }

    pub fn stream_unary<I>(&self, requests: I, options: CallOptions) -> Call<ExampleResponse>
    where
        I: IntoIterator<Item = ExampleRequest> + Send + 'static,
    {
        self.channel.stream_unary(&path("StreamUnary"), requests, options)
    }

    pub fn stream_stream<I>(&self, requests: I, options: CallOptions) -> Call<ExampleResponse>
    where
        I: IntoIterator<Item = ExampleRequest> + Send + 'static,
    {
        self.channel.stream_stream(&path("StreamStream"), requests, options)
    }
}
