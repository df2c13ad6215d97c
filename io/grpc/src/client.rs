//! Client front-end: a [`Channel`] per connection and a [`Call`] per RPC.

use crate::broadcast::{self, Subscriber};
use crate::compression::{self, Compression};
use crate::config::ChannelConfig;
use crate::connection::client::ClientEndpoint;
use crate::connection::{ConnectionManager, Core};
use crate::deadline;
use crate::error::Error;
use crate::metadata::{Metadata, Timeout};
use crate::metrics::{CALLS_STARTED, DEADLINE_EXCEEDED, record_outcome};
use crate::receive::{ReceiveStream, Streaming};
use crate::send::SendStream;
use crate::status::Status;
use crossbeam_channel::{Receiver, Sender, unbounded};
use http2::Role;
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline, relative to the start of the call.
    pub timeout: Option<Duration>,
    /// Custom request metadata. Reserved headers are dropped.
    pub metadata: Metadata,
    /// Request compression; the channel default when unset.
    pub compression: Option<Compression>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn metadata(mut self, name: &str, value: impl Into<bytes::Bytes>) -> Self {
        self.metadata.append(name, value);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// Start-call command handed to the connection thread.
///
/// A command dropped without being started fails its call, so a call
/// queued behind a closing connection never hangs.
pub(crate) struct StartCall {
    pub path: String,
    pub recv: Arc<ReceiveStream>,
    pub send: Arc<SendStream>,
    pub shared: Arc<CallShared>,
    pub started: bool,
}

impl StartCall {
    /// Fail a call that never got a stream.
    pub fn reject(&self, status: Status) {
        if self.shared.finish(status.clone(), Metadata::new()) {
            self.recv.close(Some(status.clone()));
            self.send.abort(status);
        }
    }
}

impl Drop for StartCall {
    fn drop(&mut self) {
        if !self.started {
            self.reject(Error::ConnectionClosed.into());
        }
    }
}

#[derive(Default)]
struct CallState {
    initial: Option<Metadata>,
    trailing: Option<Metadata>,
    status: Option<Status>,
    /// Dropped on completion to release the deadline watcher.
    done: Option<Sender<()>>,
}

/// Response metadata and the final status, filled in by the connection
/// thread (or a deadline watcher) and awaited by the caller.
pub(crate) struct CallShared {
    state: Mutex<CallState>,
    cond: Condvar,
}

impl CallShared {
    fn new(done: Option<Sender<()>>) -> Self {
        Self {
            state: Mutex::new(CallState {
                done,
                ..Default::default()
            }),
            cond: Condvar::new(),
        }
    }

    pub fn set_initial(&self, metadata: Metadata) {
        let mut state = self.state.lock();
        if state.initial.is_none() && state.status.is_none() {
            state.initial = Some(metadata);
            self.cond.notify_all();
        }
    }

    /// Record the final status. The first status wins; returns whether
    /// this call set it.
    pub fn finish(&self, status: Status, trailing: Metadata) -> bool {
        let mut state = self.state.lock();
        if state.status.is_some() {
            return false;
        }
        record_outcome(&status);
        state.initial.get_or_insert_with(Metadata::new);
        state.trailing = Some(trailing);
        state.status = Some(status);
        state.done = None;
        self.cond.notify_all();
        true
    }

    pub fn status(&self) -> Option<Status> {
        self.state.lock().status.clone()
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().status.is_some()
    }

    fn wait_initial(&self) -> Metadata {
        let mut state = self.state.lock();
        while state.initial.is_none() && state.status.is_none() {
            self.cond.wait(&mut state);
        }
        state.initial.clone().unwrap_or_default()
    }

    fn wait_done(&self) -> (Metadata, Status) {
        let mut state = self.state.lock();
        loop {
            if let Some(status) = &state.status {
                return (state.trailing.clone().unwrap_or_default(), status.clone());
            }
            self.cond.wait(&mut state);
        }
    }
}

/// An in-flight RPC.
///
/// Responses are read from [`messages`](Self::messages) (or
/// [`message`](Self::message) for a single response) while the connection
/// thread keeps receiving.
pub struct Call<Resp> {
    recv: Arc<ReceiveStream>,
    send: Arc<SendStream>,
    shared: Arc<CallShared>,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp: prost::Message + Default> Call<Resp> {
    /// The single response, or the call's error.
    pub fn message(self) -> Result<Resp, Status> {
        let first = self.messages().next().transpose()?;
        let status = self.status();
        if !status.is_ok() {
            return Err(status);
        }
        first.ok_or_else(|| Status::internal("response contained no message"))
    }

    /// Iterate the responses. A failed call ends with its status as the
    /// final `Err` item.
    pub fn messages(&self) -> Streaming<Resp> {
        self.recv.consume()
    }

    /// Fan the responses out to `n` independent readers.
    pub fn tee(self, n: usize) -> Vec<Subscriber<Result<Resp, Status>>>
    where
        Resp: Clone + Send + 'static,
    {
        broadcast::tee(self.messages(), n)
    }

    /// Response headers. Blocks until they arrive or the call ends.
    pub fn initial_metadata(&self) -> Metadata {
        self.shared.wait_initial()
    }

    /// Response trailers. Blocks until the call ends.
    pub fn trailing_metadata(&self) -> Metadata {
        self.shared.wait_done().0
    }

    /// Final status. Blocks until the call ends.
    pub fn status(&self) -> Status {
        self.shared.wait_done().1
    }

    /// Abandon the call. The connection resets its stream.
    pub fn cancel(&self) {
        let status = Status::cancelled("call cancelled by client");
        if self.shared.finish(status.clone(), Metadata::new()) {
            debug!("call cancelled");
            self.recv.close(Some(status.clone()));
            self.send.abort(status);
        }
    }
}

struct ChannelInner {
    commands: Sender<StartCall>,
    config: ChannelConfig,
    authority: String,
    next_call: AtomicU64,
}

/// A client connection to one server.
///
/// Cheap to clone; every clone multiplexes its calls over the same
/// connection. The connection closes once every clone is dropped and the
/// calls in flight have finished.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Connect to `addr` and start the connection thread.
    pub fn connect(addr: impl ToSocketAddrs, config: ChannelConfig) -> Result<Self, Error> {
        let socket = TcpStream::connect(addr)?;
        let peer = socket.peer_addr()?;
        let authority = config
            .authority
            .clone()
            .unwrap_or_else(|| peer.to_string());

        let (commands, inbox) = unbounded();
        let core = Core::new(
            Role::Client,
            config.http2.settings(),
            false,
            peer.to_string(),
        );
        let endpoint = ClientEndpoint::new(inbox);
        let poll_interval = config.poll_interval();

        thread::Builder::new()
            .name(format!("grpc-conn-{}", peer))
            .spawn(move || {
                if let Err(e) = ConnectionManager::new(core, endpoint).run(socket, poll_interval) {
                    warn!(%peer, error = %e, "connection ended with an error");
                }
            })?;

        debug!(%peer, %authority, "channel connected");
        Ok(Self::with_commands(commands, config, authority))
    }

    /// A channel feeding an already running connection.
    pub(crate) fn with_commands(
        commands: Sender<StartCall>,
        config: ChannelConfig,
        authority: String,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                commands,
                config,
                authority,
                next_call: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// One request, one response.
    pub fn unary_unary<Req, Resp>(&self, path: &str, request: Req, options: CallOptions) -> Call<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default,
    {
        self.start(path, options, move |send, _| {
            let _ = send.put(request);
            send.close(None);
        })
    }

    /// One request, a stream of responses. On the wire this is the same
    /// exchange as [`unary_unary`](Self::unary_unary).
    pub fn unary_stream<Req, Resp>(&self, path: &str, request: Req, options: CallOptions) -> Call<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default,
    {
        self.unary_unary(path, request, options)
    }

    /// A stream of requests, one response.
    ///
    /// `requests` is drained on a producer thread, so it may block.
    pub fn stream_unary<Req, Resp, I>(&self, path: &str, requests: I, options: CallOptions) -> Call<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default,
        I: IntoIterator<Item = Req> + Send + 'static,
    {
        self.start(path, options, move |send, id| {
            let producer = send.clone();
            let spawned = thread::Builder::new()
                .name(format!("grpc-producer-{}", id))
                .spawn(move || producer.populate(requests.into_iter().map(Ok::<Req, Status>)));
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn request producer");
                send.close(Some(Status::internal("failed to start request producer")));
            }
        })
    }

    /// Streams both ways.
    pub fn stream_stream<Req, Resp, I>(&self, path: &str, requests: I, options: CallOptions) -> Call<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default,
        I: IntoIterator<Item = Req> + Send + 'static,
    {
        self.stream_unary(path, requests, options)
    }

    fn start<Resp, F>(&self, path: &str, options: CallOptions, produce: F) -> Call<Resp>
    where
        F: FnOnce(&Arc<SendStream>, u64),
    {
        let config = &self.inner.config;
        let id = self.inner.next_call.fetch_add(1, Ordering::Relaxed);
        let compression = options.compression.unwrap_or_else(|| config.compression());
        CALLS_STARTED.increment();

        let recv = Arc::new(ReceiveStream::new(
            config.max_message_size,
            Compression::Identity,
        ));
        let send = Arc::new(SendStream::new(compression));
        send.update_headers(|headers| {
            *headers = self.request_headers(path, compression, &options);
        });

        let (done_tx, done_rx) = match options.timeout {
            Some(_) => {
                let (tx, rx) = unbounded();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let shared = Arc::new(CallShared::new(done_tx));
        let call = Call {
            recv: recv.clone(),
            send: send.clone(),
            shared: shared.clone(),
            _marker: PhantomData,
        };

        if let (Some(timeout), Some(done)) = (options.timeout, done_rx) {
            arm_deadline(id, timeout, done, &call);
        }

        produce(&send, id);

        let command = StartCall {
            path: path.to_string(),
            recv,
            send,
            shared,
            started: false,
        };
        // a command that cannot be delivered is dropped, failing the call
        let _ = self.inner.commands.send(command);
        call
    }

    fn request_headers(&self, path: &str, compression: Compression, options: &CallOptions) -> Metadata {
        let mut headers = Metadata::new();
        headers.set(":method", "POST");
        headers.set(":scheme", "http");
        headers.set(":path", path.to_string());
        headers.set(":authority", self.inner.authority.clone());
        headers.set("te", "trailers");
        headers.set("content-type", "application/grpc+proto");
        headers.set("user-agent", self.inner.config.user_agent.clone());
        headers.set("grpc-encoding", compression.name());
        headers.set("grpc-accept-encoding", compression::accept_encoding());
        if let Some(timeout) = options.timeout {
            headers.set(
                "grpc-timeout",
                Timeout::from_duration(timeout).to_grpc_format(),
            );
        }
        headers.extend(&options.metadata.for_application());
        headers
    }
}

fn arm_deadline<Resp>(id: u64, timeout: Duration, done: Receiver<()>, call: &Call<Resp>) {
    let recv = call.recv.clone();
    let send = call.send.clone();
    let shared = call.shared.clone();
    let armed = deadline::watch(format!("grpc-deadline-{}", id), timeout, done, move || {
        let status = Status::deadline_exceeded("deadline exceeded");
        if shared.finish(status.clone(), Metadata::new()) {
            debug!(call = id, "call deadline exceeded");
            DEADLINE_EXCEEDED.increment();
            recv.close(Some(status.clone()));
            send.abort(status);
        }
    });
    if let Err(e) = armed {
        warn!(error = %e, "failed to spawn deadline watcher");
        let status = Status::internal("failed to start deadline watcher");
        if call.shared.finish(status.clone(), Metadata::new()) {
            call.recv.close(Some(status.clone()));
            call.send.abort(status);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn test_call_on_closed_connection() {
        let (commands, inbox) = unbounded::<StartCall>();
        drop(inbox);
        let channel = Channel::with_commands(commands, ChannelConfig::default(), "test".into());

        let call = channel.unary_unary::<String, String>(
            "/pkg.Echo/Say",
            "x".to_string(),
            CallOptions::new(),
        );
        let status = call.status();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "connection closed");
        assert!(call.messages().next().unwrap().is_err());
    }
}
