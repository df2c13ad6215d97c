//! End-to-end tests over loopback TCP.
//!
//! Each test starts a real server on an ephemeral port and talks to it
//! through a `Channel`.

use bytes::Bytes;
use grpc::{
    CallOptions, Channel, ChannelConfig, Code, Compression, Server, ServerConfig, Service,
    ShutdownHandle, Status, Streaming,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, PartialEq, prost::Message)]
struct Request {
    #[prost(string, tag = "1")]
    value: String,
    #[prost(uint32, optional, tag = "2")]
    multiplier: Option<u32>,
    #[prost(uint32, tag = "3")]
    response_count: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct Response {
    #[prost(string, tag = "1")]
    message: String,
    #[prost(uint32, tag = "2")]
    seqno: u32,
}

/// Responses built by the `Endless` handler so far.
static ENDLESS_PRODUCED: AtomicUsize = AtomicUsize::new(0);

fn request(value: &str) -> Request {
    Request {
        value: value.to_string(),
        multiplier: None,
        response_count: 1,
    }
}

fn repeated(req: &Request) -> String {
    req.value.repeat(req.multiplier.unwrap_or(1) as usize)
}

fn example_service() -> Service {
    Service::new("test.Example")
        .unary_unary("Unary", |req: Request, _ctx| {
            Ok(Response {
                message: repeated(&req),
                seqno: 1,
            })
        })
        .unary_stream("UnaryStream", |req: Request, _ctx| {
            let message = repeated(&req);
            Ok((1..=req.response_count).map(move |seqno| {
                Ok(Response {
                    message: message.clone(),
                    seqno,
                })
            }))
        })
        .stream_unary("StreamUnary", |reqs: Streaming<Request>, _ctx| {
            let mut message = String::new();
            let mut count = 0;
            for req in reqs {
                message.push_str(&repeated(&req?));
                count += 1;
            }
            Ok(Response {
                message,
                seqno: count,
            })
        })
        .stream_stream("StreamStream", |reqs: Streaming<Request>, _ctx| {
            Ok(reqs.enumerate().map(|(i, req)| {
                req.map(|req| Response {
                    message: repeated(&req),
                    seqno: i as u32 + 1,
                })
            }))
        })
        .unary_unary("Sleep", |req: Request, ctx| {
            let started = Instant::now();
            while !ctx.is_cancelled() && started.elapsed() < Duration::from_secs(5) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(Response {
                message: req.value,
                seqno: 0,
            })
        })
        .unary_unary("Fail", |req: Request, _ctx| -> Result<Response, Status> {
            Err(Status::invalid_argument(req.value).with_details(Bytes::from_static(b"\x08\x03")))
        })
        .unary_unary("Panic", |_req: Request, _ctx| -> Result<Response, Status> {
            panic!("boom");
        })
        .unary_stream("Endless", |req: Request, _ctx| {
            Ok((1u32..).map(move |seqno| {
                ENDLESS_PRODUCED.fetch_add(1, Ordering::SeqCst);
                Ok(Response {
                    message: req.value.clone(),
                    seqno,
                })
            }))
        })
        .unary_stream("StreamThenFail", |req: Request, _ctx| {
            let ok = (1..=req.response_count).map(|seqno| {
                Ok(Response {
                    message: "partial".to_string(),
                    seqno,
                })
            });
            Ok(ok.chain(std::iter::once(Err(Status::new(
                Code::ResourceExhausted,
                "out of quota",
            )))))
        })
        .unary_unary("Echo", |req: Request, ctx| {
            if let Some(user) = ctx.metadata().get("x-user") {
                ctx.set_header("x-user", user);
            }
            if let Some(token) = ctx.metadata().get_bin("x-token-bin") {
                ctx.set_trailer("x-token-bin", token);
            }
            Ok(Response {
                message: req.value,
                seqno: 0,
            })
        })
        .unary_unary("Context", |_req: Request, ctx| {
            Ok(Response {
                message: format!(
                    "{} deadline={} peer={}",
                    ctx.method(),
                    ctx.deadline().is_some(),
                    ctx.peer().is_some()
                ),
                seqno: 0,
            })
        })
}

struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        Self::with_config(ServerConfig::default())
    }

    fn with_config(config: ServerConfig) -> Self {
        let server = Server::builder(config)
            .add_service(example_service())
            .build();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || {
            server.serve(listener).unwrap();
        });
        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    fn channel(&self) -> Channel {
        Channel::connect(self.addr, ChannelConfig::default()).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[test]
fn test_unary() {
    let server = TestServer::start();
    let channel = server.channel();

    let response: Response = channel
        .unary_unary("/test.Example/Unary", request("A"), CallOptions::new())
        .message()
        .unwrap();
    assert_eq!(response.message, "A");
    assert_eq!(response.seqno, 1);
}

#[test]
fn test_unary_stream() {
    let server = TestServer::start();
    let channel = server.channel();

    let req = Request {
        value: "ab".to_string(),
        multiplier: Some(2),
        response_count: 2,
    };
    let call = channel.unary_stream::<Request, Response>(
        "/test.Example/UnaryStream",
        req,
        CallOptions::new(),
    );
    let responses: Vec<Response> = call.messages().map(Result::unwrap).collect();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].seqno, 1);
    assert_eq!(responses[1].seqno, 2);
    assert!(responses.iter().all(|r| r.message == "abab"));
    assert!(call.status().is_ok());
}

#[test]
fn test_concurrent_calls_share_a_connection() {
    let server = TestServer::start();
    let channel = server.channel();

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let channel = channel.clone();
            thread::spawn(move || {
                for j in 0..10 {
                    let value = format!("{}-{}", i, j);
                    let response: Response = channel
                        .unary_unary("/test.Example/Unary", request(&value), CallOptions::new())
                        .message()
                        .unwrap();
                    assert_eq!(response.message, value);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_concurrent_bidi_streams_keep_their_order() {
    let server = TestServer::start();
    let channel = server.channel();

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let channel = channel.clone();
            thread::spawn(move || {
                let requests: Vec<Request> =
                    (0..50).map(|j| request(&format!("{}-{}", i, j))).collect();
                let call = channel.stream_stream::<Request, Response, _>(
                    "/test.Example/StreamStream",
                    requests,
                    CallOptions::new(),
                );
                let responses: Vec<Response> = call.messages().map(Result::unwrap).collect();
                assert_eq!(responses.len(), 50);
                for (j, response) in responses.iter().enumerate() {
                    assert_eq!(response.seqno, j as u32 + 1);
                    assert_eq!(response.message, format!("{}-{}", i, j));
                }
                assert!(call.status().is_ok());
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_slow_reader_holds_back_the_producer() {
    let server = TestServer::start();
    let mut config = ChannelConfig::default();
    config.http2.initial_window_size = 65_535;
    let channel = Channel::connect(server.addr, config).unwrap();

    let call = channel.unary_stream::<Request, Response>(
        "/test.Example/Endless",
        request(&"x".repeat(100)),
        CallOptions::new(),
    );
    let mut responses = call.messages();
    assert_eq!(responses.next().unwrap().unwrap().seqno, 1);
    thread::sleep(Duration::from_millis(500));

    // about 110 wire bytes each: one stream window in flight plus what the
    // sender may queue ahead of it
    let produced = ENDLESS_PRODUCED.load(Ordering::SeqCst);
    assert!(produced < 2_000, "produced {} responses", produced);

    // reading on lets the handler continue past the window
    for seqno in 2..=3_000 {
        assert_eq!(responses.next().unwrap().unwrap().seqno, seqno);
    }
    call.cancel();
    assert_eq!(call.status().code(), Code::Cancelled);
}

#[test]
fn test_deadline_exceeded() {
    let server = TestServer::start();
    let channel = server.channel();

    let started = Instant::now();
    let err = channel
        .unary_unary::<Request, Response>(
            "/test.Example/Sleep",
            request("slow"),
            CallOptions::new().timeout(Duration::from_millis(100)),
        )
        .message()
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(3));

    // the connection is still usable afterwards
    let response: Response = channel
        .unary_unary("/test.Example/Unary", request("B"), CallOptions::new())
        .message()
        .unwrap();
    assert_eq!(response.message, "B");
}

#[test]
fn test_unknown_method() {
    let server = TestServer::start();
    let channel = server.channel();

    let err = channel
        .unary_unary::<Request, Response>("/test.Example/Nope", request("x"), CallOptions::new())
        .message()
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
}

#[test]
fn test_handler_error_carries_details() {
    let server = TestServer::start();
    let channel = server.channel();

    let err = channel
        .unary_unary::<Request, Response>(
            "/test.Example/Fail",
            request("bad input: 100%"),
            CallOptions::new(),
        )
        .message()
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "bad input: 100%");
    assert_eq!(err.details().map(|d| &d[..]), Some(&b"\x08\x03"[..]));
}

#[test]
fn test_handler_panic_is_unknown() {
    let server = TestServer::start();
    let channel = server.channel();

    let err = channel
        .unary_unary::<Request, Response>("/test.Example/Panic", request("x"), CallOptions::new())
        .message()
        .unwrap_err();
    assert_eq!(err.code(), Code::Unknown);
    assert!(err.message().contains("boom"));
}

#[test]
fn test_compressed_calls() {
    let server = TestServer::start();
    let channel = server.channel();

    for compression in [Compression::Gzip, Compression::Deflate] {
        let req = Request {
            value: "compressible ".to_string(),
            multiplier: Some(500),
            response_count: 3,
        };
        let call = channel.unary_stream::<Request, Response>(
            "/test.Example/UnaryStream",
            req,
            CallOptions::new().compression(compression),
        );
        let responses: Vec<Response> = call.messages().map(Result::unwrap).collect();
        assert_eq!(responses.len(), 3, "{}", compression);
        assert!(responses.iter().all(|r| r.message.len() == 13 * 500));
    }
}

#[test]
fn test_server_default_compression() {
    let config = ServerConfig {
        default_compression: "gzip".to_string(),
        ..Default::default()
    };
    let server = TestServer::with_config(config);
    let channel = server.channel();

    let response: Response = channel
        .unary_unary("/test.Example/Unary", request("zipped"), CallOptions::new())
        .message()
        .unwrap();
    assert_eq!(response.message, "zipped");
}

#[test]
fn test_error_after_messages() {
    let server = TestServer::start();
    let channel = server.channel();

    let req = Request {
        value: String::new(),
        multiplier: None,
        response_count: 2,
    };
    let call = channel.unary_stream::<Request, Response>(
        "/test.Example/StreamThenFail",
        req,
        CallOptions::new(),
    );
    let items: Vec<Result<Response, Status>> = call.messages().collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().seqno, 1);
    assert_eq!(items[1].as_ref().unwrap().seqno, 2);
    let err = items[2].as_ref().unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert_eq!(call.status().code(), Code::ResourceExhausted);
}

#[test]
fn test_empty_stream_differs_from_trailers_only_error() {
    let server = TestServer::start();
    let channel = server.channel();

    let empty = Request {
        value: "unused".to_string(),
        multiplier: None,
        response_count: 0,
    };
    let call = channel.unary_stream::<Request, Response>(
        "/test.Example/UnaryStream",
        empty.clone(),
        CallOptions::new(),
    );
    assert_eq!(call.messages().count(), 0);
    assert_eq!(call.status().code(), Code::Ok);

    // fails before its first message
    let call = channel.unary_stream::<Request, Response>(
        "/test.Example/StreamThenFail",
        empty,
        CallOptions::new(),
    );
    let items: Vec<Result<Response, Status>> = call.messages().collect();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap_err().code(), Code::ResourceExhausted);
    assert_eq!(call.status().code(), Code::ResourceExhausted);
    assert_eq!(call.status().message(), "out of quota");
}

#[test]
fn test_client_streaming() {
    let server = TestServer::start();
    let channel = server.channel();

    let requests = vec![request("a"), request("b"), request("c")];
    let response: Response = channel
        .stream_unary("/test.Example/StreamUnary", requests, CallOptions::new())
        .message()
        .unwrap();
    assert_eq!(response.message, "abc");
    assert_eq!(response.seqno, 3);
}

#[test]
fn test_bidi_streaming() {
    let server = TestServer::start();
    let channel = server.channel();

    let (tx, rx) = crossbeam_channel::unbounded();
    let call = channel.stream_stream::<Request, Response, _>(
        "/test.Example/StreamStream",
        rx,
        CallOptions::new(),
    );
    let mut responses = call.messages();

    // each response arrives before the next request is sent
    for (i, value) in ["x", "y", "z"].iter().enumerate() {
        tx.send(request(value)).unwrap();
        let response = responses.next().unwrap().unwrap();
        assert_eq!(response.message, *value);
        assert_eq!(response.seqno, i as u32 + 1);
    }
    drop(tx);
    assert!(responses.next().is_none());
    assert!(call.status().is_ok());
}

#[test]
fn test_metadata_round_trip() {
    let server = TestServer::start();
    let channel = server.channel();

    let token = Bytes::from_static(&[0, 159, 146, 150]);
    let call = channel.unary_unary::<Request, Response>(
        "/test.Example/Echo",
        request("hi"),
        CallOptions::new()
            .metadata("x-user", "alice")
            .metadata("x-token-bin", token.clone()),
    );
    assert_eq!(call.initial_metadata().get_str("x-user"), Some("alice"));
    assert_eq!(call.trailing_metadata().get_bin("x-token-bin"), Some(token));
    assert!(call.status().is_ok());
}

#[test]
fn test_server_context() {
    let server = TestServer::start();
    let channel = server.channel();

    let response: Response = channel
        .unary_unary(
            "/test.Example/Context",
            request("x"),
            CallOptions::new().timeout(Duration::from_secs(10)),
        )
        .message()
        .unwrap();
    assert_eq!(response.message, "/test.Example/Context deadline=true peer=true");
}

#[test]
fn test_tee_responses() {
    let server = TestServer::start();
    let channel = server.channel();

    let req = Request {
        value: "t".to_string(),
        multiplier: None,
        response_count: 3,
    };
    let subscribers = channel
        .unary_stream::<Request, Response>("/test.Example/UnaryStream", req, CallOptions::new())
        .tee(2);
    let readers: Vec<_> = subscribers
        .into_iter()
        .map(|subscriber| {
            thread::spawn(move || {
                subscriber
                    .map(|r| r.unwrap().seqno)
                    .collect::<Vec<u32>>()
            })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), vec![1, 2, 3]);
    }
}

#[test]
fn test_connection_lost_is_unavailable() {
    // accepts, then hangs up without speaking HTTP/2
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        drop(socket);
    });

    let channel = Channel::connect(addr, ChannelConfig::default()).unwrap();
    acceptor.join().unwrap();

    let err = channel
        .unary_unary::<Request, Response>("/test.Example/Unary", request("x"), CallOptions::new())
        .message()
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[test]
fn test_graceful_shutdown_finishes_calls() {
    let server = TestServer::start();
    let channel = server.channel();

    let call = channel.unary_unary::<Request, Response>(
        "/test.Example/Sleep",
        request("late"),
        CallOptions::new().timeout(Duration::from_millis(300)),
    );
    thread::sleep(Duration::from_millis(50));
    server.shutdown.shutdown();

    // the in-flight call ends by its own deadline, not by the shutdown
    assert_eq!(call.status().code(), Code::DeadlineExceeded);
    drop(server);
}
