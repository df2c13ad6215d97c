//! Calls every method of the `Example` service and prints the responses.

use clap::{Parser, ValueEnum};
use grpc::{CallOptions, Channel, Compression};
use server::config::Config;
use server::{ExampleClient, ExampleRequest, logging};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    UnaryUnary,
    UnaryStream,
    StreamUnary,
    StreamStream,
}

#[derive(Parser)]
#[command(name = "example-client")]
#[command(about = "Example gRPC client")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server address; defaults to the configured listen address
    #[arg(long)]
    addr: Option<SocketAddr>,

    #[arg(long, value_enum, default_value = "unary-unary")]
    method: Method,

    /// Request value
    #[arg(long, default_value = "hello")]
    value: String,

    #[arg(long)]
    multiplier: Option<u32>,

    /// Responses requested from unary-stream, requests sent otherwise
    #[arg(long, default_value_t = 3)]
    count: u32,

    /// Call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// "identity", "gzip", or "deflate"
    #[arg(long)]
    compression: Option<String>,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);

    if let Err(e) = run(&args, config) {
        tracing::error!(error = %e, "call failed");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = args.addr.unwrap_or(config.listen.address);
    let client = ExampleClient::new(Channel::connect(addr, config.channel)?);

    let mut options = CallOptions::new();
    if let Some(ms) = args.timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }
    if let Some(name) = &args.compression {
        let compression = Compression::from_name(name)
            .ok_or_else(|| format!("unknown compression {:?}", name))?;
        options = options.compression(compression);
    }

    let request = ExampleRequest {
        value: args.value.clone(),
        multiplier: args.multiplier,
        response_count: args.count,
    };
    let requests = vec![request.clone(); args.count as usize];

    let call = match args.method {
        Method::UnaryUnary => client.unary_unary(request, options),
        Method::UnaryStream => client.unary_stream(request, options),
        Method::StreamUnary => client.stream_unary(requests, options),
        Method::StreamStream => client.stream_stream(requests, options),
    };

    for response in call.messages() {
        let response = response?;
        println!("{}: {}", response.seqno, response.message);
    }
    let status = call.status();
    println!("status: {}", status);
    if !status.is_ok() {
        return Err(status.into());
    }
    Ok(())
}
