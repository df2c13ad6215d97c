//! Server role: validates requests, dispatches handlers, and closes each
//! response with trailers.

use super::{Core, Endpoint, LinkState};
use crate::compression::{self, Compression};
use crate::config::ServerConfig;
use crate::deadline;
use crate::metadata::{Metadata, Timeout};
use crate::metrics::{CALLS_STARTED, DEADLINE_EXCEEDED, PROTOCOL_ERRORS, record_outcome};
use crate::receive::ReceiveStream;
use crate::registry::MethodRegistry;
use crate::send::SendStream;
use crate::service::{ServerCall, ServerContext};
use crate::status::Status;
use crossbeam_channel::{Sender, unbounded};
use http2::{ErrorCode, HeaderField, StreamId};
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Names handler and watcher threads uniquely across connections.
static NEXT_CALL: AtomicU64 = AtomicU64::new(0);

pub(crate) struct ServerEndpoint {
    registry: Arc<MethodRegistry>,
    config: Arc<ServerConfig>,
    shutdown: Arc<AtomicBool>,
    peer: Option<SocketAddr>,
    /// Dropping a sender releases that call's deadline watcher.
    watchers: HashMap<StreamId, Sender<()>>,
}

impl ServerEndpoint {
    pub fn new(
        registry: Arc<MethodRegistry>,
        config: Arc<ServerConfig>,
        shutdown: Arc<AtomicBool>,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            registry,
            config,
            shutdown,
            peer,
            watchers: HashMap::new(),
        }
    }

    /// Answer with a single HEADERS frame carrying `status`; no stream
    /// objects are created.
    fn reply_trailers_only(
        &self,
        core: &mut Core,
        stream_id: StreamId,
        end_stream: bool,
        http_status: u16,
        status: Status,
    ) {
        debug!(%stream_id, http_status, %status, "rejecting request");
        let mut block = Metadata::new();
        block.set(":status", http_status.to_string());
        block.set("content-type", "application/grpc+proto");
        block.set("grpc-accept-encoding", compression::accept_encoding());
        status.write_trailers(&mut block);

        if let Err(e) = core.engine.send_headers(stream_id, &block.for_wire(), true) {
            debug!(%stream_id, error = %e, "could not send trailers-only response");
        }
        if !end_stream {
            // the request body is not wanted
            core.reset(stream_id, ErrorCode::NoError);
        }
        record_outcome(&status);
    }

    fn arm_deadline(
        &mut self,
        stream_id: StreamId,
        call_id: u64,
        timeout: Timeout,
        recv: &Arc<ReceiveStream>,
        send: &Arc<SendStream>,
    ) {
        let (done_tx, done_rx) = unbounded();
        let recv = recv.clone();
        let send = send.clone();
        let armed = deadline::watch(
            format!("grpc-deadline-{}", call_id),
            timeout.as_duration(),
            done_rx,
            move || {
                debug!(%stream_id, "call deadline exceeded");
                DEADLINE_EXCEEDED.increment();
                let status = Status::deadline_exceeded("deadline exceeded");
                send.abort(status.clone());
                recv.close(Some(status));
            },
        );
        match armed {
            Ok(()) => {
                self.watchers.insert(stream_id, done_tx);
            }
            Err(e) => warn!(%stream_id, error = %e, "failed to spawn deadline watcher"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Endpoint for ServerEndpoint {
    fn poll(&mut self, core: &mut Core) {
        if self.shutdown.load(Ordering::Relaxed)
            && matches!(core.state, LinkState::Connecting | LinkState::Open)
        {
            info!(peer = %core.peer, "shutting down, draining connection");
            core.engine.close_connection(ErrorCode::NoError);
            core.state = LinkState::Closing;
        }
    }

    fn on_request(
        &mut self,
        core: &mut Core,
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) {
        if core.state == LinkState::Closing {
            trace!(%stream_id, "refusing request while closing");
            core.reset(stream_id, ErrorCode::RefusedStream);
            return;
        }

        let metadata = match Metadata::from_wire(&headers) {
            Ok(metadata) => metadata,
            Err(e) => {
                PROTOCOL_ERRORS.increment();
                debug!(%stream_id, error = %e, "malformed request headers");
                core.reset(stream_id, ErrorCode::ProtocolError);
                return;
            }
        };

        let method = metadata.get_str(":method").unwrap_or_default();
        if method != "POST" && method != "GET" {
            let status = Status::unimplemented(format!("HTTP method {} not allowed", method));
            self.reply_trailers_only(core, stream_id, end_stream, 405, status);
            return;
        }

        let path = metadata.get_str(":path").unwrap_or_default().to_string();
        let Some(registered) = self.registry.get(&path) else {
            let status = Status::unimplemented(format!("unknown method {}", path));
            self.reply_trailers_only(core, stream_id, end_stream, 200, status);
            return;
        };
        let handler = registered.handler.clone();

        let request_encoding = match metadata.get_str("grpc-encoding") {
            None => Compression::Identity,
            Some(name) => match Compression::from_name(name) {
                Some(encoding) => encoding,
                None => {
                    let status =
                        Status::unimplemented(format!("unsupported grpc-encoding {}", name));
                    self.reply_trailers_only(core, stream_id, end_stream, 200, status);
                    return;
                }
            },
        };
        let preferred = if request_encoding.is_identity() {
            self.config.compression()
        } else {
            request_encoding
        };
        let accept = metadata.get_str("grpc-accept-encoding").unwrap_or_default();
        let response_encoding =
            compression::select_algorithm(accept, preferred.name()).unwrap_or_default();

        let timeout = match metadata.get_str("grpc-timeout").map(Timeout::parse) {
            None => None,
            Some(Ok(timeout)) => Some(timeout),
            Some(Err(e)) => {
                let status = Status::internal(format!("malformed grpc-timeout: {}", e));
                self.reply_trailers_only(core, stream_id, end_stream, 200, status);
                return;
            }
        };
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t.as_duration()));

        let recv = Arc::new(ReceiveStream::new(
            self.config.max_message_size,
            request_encoding,
        ));
        let send = Arc::new(SendStream::new(response_encoding));
        send.update_headers(|h| {
            h.set(":status", "200");
            h.set("content-type", "application/grpc+proto");
            h.set("grpc-encoding", response_encoding.name());
            h.set("grpc-accept-encoding", compression::accept_encoding());
        });
        core.recv.insert(stream_id, recv.clone());
        core.send.insert(stream_id, send.clone());

        CALLS_STARTED.increment();
        let call_id = NEXT_CALL.fetch_add(1, Ordering::Relaxed);
        debug!(%stream_id, %path, encoding = %response_encoding, "call started");

        if let (Some(timeout), Some(_)) = (timeout, deadline) {
            self.arm_deadline(stream_id, call_id, timeout, &recv, &send);
        }

        let context = ServerContext::new(
            path,
            metadata.for_application(),
            deadline,
            self.peer,
            send.clone(),
        );
        let call = ServerCall {
            recv,
            send: send.clone(),
            context,
        };
        let spawned = thread::Builder::new()
            .name(format!("grpc-handler-{}", call_id))
            .spawn(move || {
                let send = call.send.clone();
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(call))) {
                    let message = panic_message(panic.as_ref());
                    error!(%message, "handler panicked");
                    send.close(Some(Status::unknown(format!("handler panicked: {}", message))));
                }
            });
        if let Err(e) = spawned {
            error!(%stream_id, error = %e, "failed to spawn handler");
            send.close(Some(Status::unavailable("server could not start handler")));
        }
    }

    fn on_trailers(&mut self, _core: &mut Core, stream_id: StreamId, _headers: Vec<HeaderField>) {
        // request trailers carry nothing we use; StreamEnded follows
        trace!(%stream_id, "request trailers ignored");
    }

    fn on_stream_failed(&mut self, stream_id: StreamId, status: &Status) {
        self.watchers.remove(&stream_id);
        record_outcome(status);
    }

    fn on_send_error(&mut self, core: &mut Core, stream_id: StreamId, status: Status) {
        trace!(%stream_id, %status, "response ends with an error");
        self.finish_send(core, stream_id);
    }

    fn finish_send(&mut self, core: &mut Core, stream_id: StreamId) {
        let Some(send) = core.send.remove(&stream_id) else {
            return;
        };
        self.watchers.remove(&stream_id);

        let block = if send.headers_sent() {
            send.trailers_to_send()
        } else {
            Some(send.trailers_only_to_send())
        };
        if let Some(block) = block
            && let Err(e) = core.engine.send_headers(stream_id, &block, true)
        {
            debug!(%stream_id, error = %e, "could not send trailers");
        }

        let status = send.status().unwrap_or_else(Status::ok);
        debug!(%stream_id, code = %status.code(), "call finished");
        record_outcome(&status);

        if let Some(recv) = core.recv.remove(&stream_id) {
            // the handler is done; the rest of the request is not wanted
            recv.close(Some(Status::cancelled("call already completed")));
            core.reset(stream_id, ErrorCode::NoError);
        }
    }

    fn on_terminated(&mut self, _status: &Status) {
        self.watchers.clear();
    }
}
