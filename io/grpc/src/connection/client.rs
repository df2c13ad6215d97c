//! Client role: opens a stream per call and turns response headers and
//! trailers into call results.

use super::{Core, Endpoint, LinkState};
use crate::client::{CallShared, StartCall};
use crate::compression::Compression;
use crate::metadata::Metadata;
use crate::metrics::PROTOCOL_ERRORS;
use crate::status::{Code, Status};
use crossbeam_channel::{Receiver, TryRecvError};
use http2::{ErrorCode, HeaderField, StreamId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) struct ClientEndpoint {
    commands: Receiver<StartCall>,
    /// Calls waiting for a free stream slot.
    pending: VecDeque<StartCall>,
    calls: HashMap<StreamId, Arc<CallShared>>,
    /// Every channel handle is gone; close once idle.
    detached: bool,
}

impl ClientEndpoint {
    pub fn new(commands: Receiver<StartCall>) -> Self {
        Self {
            commands,
            pending: VecDeque::new(),
            calls: HashMap::new(),
            detached: false,
        }
    }

    /// Fail and evict a stream, resetting it with `reset`.
    fn fail(&mut self, core: &mut Core, stream_id: StreamId, reset: Option<ErrorCode>, status: Status) {
        core.fail_stream(stream_id, reset, status.clone());
        if let Some(call) = self.calls.remove(&stream_id) {
            call.finish(status, Metadata::new());
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.pending.push_back(command),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    if !self.detached {
                        debug!("all channel handles dropped");
                    }
                    self.detached = true;
                    return;
                }
            }
        }
    }

    fn start_calls(&mut self, core: &mut Core) {
        let limit = core.engine.remote_settings().max_concurrent_streams as usize;
        while let Some(command) = self.pending.pop_front() {
            if command.shared.is_done() {
                // expired or cancelled before it got a stream
                continue;
            }
            if core.state == LinkState::Closing {
                command.reject(Status::unavailable("connection is closing"));
                continue;
            }
            if core.engine.open_streams() >= limit {
                self.pending.push_front(command);
                return;
            }
            self.start_call(core, command);
        }
    }

    fn start_call(&mut self, core: &mut Core, mut command: StartCall) {
        let stream_id = match core.engine.get_next_available_stream_id() {
            Ok(id) => id,
            Err(e) => {
                command.reject(Status::unavailable(e.to_string()));
                return;
            }
        };
        let Some(headers) = command.send.headers_to_send(false) else {
            command.reject(Status::internal("request headers already sent"));
            return;
        };
        if let Err(e) = core.engine.send_headers(stream_id, &headers, false) {
            warn!(%stream_id, error = %e, "failed to open stream");
            command.reject(Status::unavailable(e.to_string()));
            return;
        }

        debug!(%stream_id, path = %command.path, "call started");
        command.started = true;
        core.recv.insert(stream_id, command.recv.clone());
        core.send.insert(stream_id, command.send.clone());
        self.calls.insert(stream_id, command.shared.clone());
    }

    /// Evict streams closed from outside the loop (deadline, cancel).
    fn sweep(&mut self, core: &mut Core) {
        let closed: Vec<StreamId> = core
            .recv
            .iter()
            .filter(|(_, recv)| recv.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for stream_id in closed {
            let status = self
                .calls
                .get(&stream_id)
                .and_then(|call| call.status())
                .unwrap_or_else(|| Status::internal("response stream closed locally"));
            trace!(%stream_id, code = %status.code(), "sweeping closed stream");
            self.fail(core, stream_id, Some(ErrorCode::Cancel), status);
        }
    }

    /// Trailers, or a trailers-only response: the call's outcome.
    fn finish_response(&mut self, core: &mut Core, stream_id: StreamId, metadata: Metadata) {
        let status = Status::from_trailers(&metadata).unwrap_or_else(|| {
            match http_status(&metadata) {
                Some(code) if code != 200 => Status::new(
                    Code::from_http_status(code),
                    format!("unexpected HTTP status {}", code),
                ),
                _ => Status::unknown("response ended without grpc-status"),
            }
        });
        debug!(%stream_id, code = %status.code(), "call finished");
        if let Some(recv) = core.recv.get(&stream_id) {
            recv.close((!status.is_ok()).then(|| status.clone()));
        }
        if let Some(call) = self.calls.remove(&stream_id) {
            call.finish(status, metadata.for_application());
        }
    }
}

fn http_status(metadata: &Metadata) -> Option<u16> {
    metadata.get_str(":status").and_then(|s| s.parse().ok())
}

impl Endpoint for ClientEndpoint {
    fn poll(&mut self, core: &mut Core) {
        self.sweep(core);
        self.drain_commands();
        if core.state != LinkState::Connecting {
            self.start_calls(core);
        }

        if self.detached && core.is_idle() && self.is_idle() && core.state != LinkState::Closed {
            debug!(peer = %core.peer, "channel dropped, closing connection");
            core.engine.close_connection(ErrorCode::NoError);
            core.state = LinkState::Closed;
        }
    }

    fn is_idle(&self) -> bool {
        self.calls.is_empty() && self.pending.is_empty()
    }

    fn on_response(
        &mut self,
        core: &mut Core,
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) {
        let metadata = match Metadata::from_wire(&headers) {
            Ok(metadata) => metadata,
            Err(e) => {
                PROTOCOL_ERRORS.increment();
                self.fail(core, stream_id, Some(ErrorCode::ProtocolError), Status::from(e));
                return;
            }
        };
        if end_stream {
            self.finish_response(core, stream_id, metadata);
            return;
        }

        match http_status(&metadata) {
            Some(200) => {}
            code => {
                let code = code.unwrap_or(0);
                let status = Status::new(
                    Code::from_http_status(code),
                    format!("unexpected HTTP status {}", code),
                );
                self.fail(core, stream_id, Some(ErrorCode::Cancel), status);
                return;
            }
        }

        let encoding = match metadata.get_str("grpc-encoding") {
            None => Compression::Identity,
            Some(name) => match Compression::from_name(name) {
                Some(encoding) => encoding,
                None => {
                    let status = Status::internal(format!("unsupported grpc-encoding {}", name));
                    self.fail(core, stream_id, Some(ErrorCode::Cancel), status);
                    return;
                }
            },
        };
        if let Some(recv) = core.recv.get(&stream_id) {
            recv.set_encoding(encoding);
        }
        if let Some(call) = self.calls.get(&stream_id) {
            call.set_initial(metadata.for_application());
        }
    }

    fn on_trailers(&mut self, core: &mut Core, stream_id: StreamId, headers: Vec<HeaderField>) {
        match Metadata::from_wire(&headers) {
            Ok(metadata) => self.finish_response(core, stream_id, metadata),
            Err(e) => {
                PROTOCOL_ERRORS.increment();
                self.fail(core, stream_id, Some(ErrorCode::ProtocolError), Status::from(e));
            }
        }
    }

    fn on_stream_ended(&mut self, core: &mut Core, stream_id: StreamId) {
        if let Some(call) = self.calls.remove(&stream_id) {
            // DATA with END_STREAM and no trailers
            let status = Status::unknown("response ended without trailers");
            if let Some(recv) = core.recv.get(&stream_id) {
                recv.close(Some(status.clone()));
            }
            call.finish(status, Metadata::new());
        }
        // the response is complete; stop sending the request
        if let Some(send) = core.send.remove(&stream_id) {
            send.abort(Status::cancelled("response already complete"));
            core.reset(stream_id, ErrorCode::Cancel);
        }
    }

    fn on_stream_failed(&mut self, stream_id: StreamId, status: &Status) {
        if let Some(call) = self.calls.remove(&stream_id) {
            call.finish(status.clone(), Metadata::new());
        }
    }

    fn on_send_error(&mut self, core: &mut Core, stream_id: StreamId, status: Status) {
        debug!(%stream_id, %status, "request stream failed");
        self.fail(core, stream_id, Some(ErrorCode::Cancel), status);
    }

    fn finish_send(&mut self, core: &mut Core, stream_id: StreamId) {
        core.send.remove(&stream_id);
        if let Err(e) = core.engine.end_stream(stream_id) {
            debug!(%stream_id, error = %e, "could not end request stream");
        }
    }

    fn on_goaway(&mut self, core: &mut Core, last_stream_id: StreamId, _error_code: ErrorCode) {
        let refused: Vec<StreamId> = self
            .calls
            .keys()
            .filter(|id| **id > last_stream_id)
            .copied()
            .collect();
        for stream_id in refused {
            self.fail(
                core,
                stream_id,
                None,
                Status::unavailable("stream not processed before GOAWAY"),
            );
        }
    }

    fn on_terminated(&mut self, status: &Status) {
        for (_, call) in self.calls.drain() {
            call.finish(status.clone(), Metadata::new());
        }
        self.drain_commands();
        for command in self.pending.drain(..) {
            command.reject(status.clone());
        }
    }
}
