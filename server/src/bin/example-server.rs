//! Serves the `Example` service.

use clap::Parser;
use grpc::Server;
use server::banner::{BannerConfig, print_banner};
use server::config::{Config, DEFAULT_CONFIG};
use server::{example_service, logging, signal, stats};
use std::net::TcpListener;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "example-server")]
#[command(about = "Example gRPC server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", DEFAULT_CONFIG);
        return;
    }

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

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::builder(config.server.clone())
        .add_service(example_service())
        .build();
    signal::install(server.shutdown_handle())?;

    let listener = TcpListener::bind(config.listen.address)?;
    print_banner(&BannerConfig {
        version: env!("CARGO_PKG_VERSION"),
        address: listener.local_addr()?,
        server: server.config(),
        methods: server.registry().descriptors().collect(),
    });

    server.serve(listener)?;
    stats::log_summary();
    tracing::info!("server stopped");
    Ok(())
}
