//! Startup banner.

use grpc::{MethodDescriptor, ServerConfig};
use std::net::SocketAddr;

pub struct BannerConfig<'a> {
    pub version: &'a str,
    pub address: SocketAddr,
    pub server: &'a ServerConfig,
    pub methods: Vec<&'a MethodDescriptor>,
}

/// Render the banner printed before the server starts accepting.
pub fn render(config: &BannerConfig) -> String {
    let name = "example-server";
    let title = format!("{} v{}", name, config.version);
    let mut output = String::with_capacity(512);

    output.push_str(&format!("{}\n{}\n\n", title, "=".repeat(title.len())));
    output.push_str(&format!("Listening:   {}\n", config.address));
    output.push_str(&format!("Compression: {}\n", config.server.compression()));
    output.push_str(&format!(
        "Window:      {} bytes\n",
        config.server.http2.initial_window_size
    ));
    output.push_str(&format!(
        "Streams:     {} per connection\n\n",
        config.server.http2.max_concurrent_streams
    ));

    output.push_str("Methods:\n");
    let mut methods = config.methods.clone();
    methods.sort_by_key(|m| m.path());
    for method in methods {
        output.push_str(&format!("  {} ({})\n", method.path(), method.cardinality));
    }
    output.push('\n');
    output
}

pub fn print_banner(config: &BannerConfig) {
    print!("{}", render(config));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::example_service;
    use grpc::MethodRegistry;

    #[test]
    fn test_banner_lists_methods() {
        let mut registry = MethodRegistry::new();
        registry.add_service(example_service());
        let server = ServerConfig::default();
        let banner = render(&BannerConfig {
            version: "0.1.0",
            address: "127.0.0.1:50051".parse().unwrap(),
            server: &server,
            methods: registry.descriptors().collect(),
        });
        assert!(banner.starts_with("example-server v0.1.0\n"));
        assert!(banner.contains("/example.Example/UnaryUnary (unary-unary)"));
        assert!(banner.contains("/example.Example/StreamStream (stream-stream)"));
    }
}
