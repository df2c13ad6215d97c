//! Method descriptors and the path-to-handler table a server dispatches on.

use crate::service::{Handler, Service};
use std::collections::HashMap;
use std::fmt;

/// Whether each side of a method carries one message or a stream of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    UnaryUnary,
    UnaryStream,
    StreamUnary,
    StreamStream,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cardinality::UnaryUnary => "unary-unary",
            Cardinality::UnaryStream => "unary-stream",
            Cardinality::StreamUnary => "stream-unary",
            Cardinality::StreamStream => "stream-stream",
        };
        f.write_str(name)
    }
}

/// Static description of one RPC method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Fully qualified service name, e.g. `helloworld.Greeter`.
    pub service: String,
    pub method: String,
    pub cardinality: Cardinality,
    pub input_type: String,
    pub output_type: String,
}

impl MethodDescriptor {
    /// Describe a method whose message types are `Req` and `Resp`.
    pub fn new<Req, Resp>(
        service: impl Into<String>,
        method: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            cardinality,
            input_type: std::any::type_name::<Req>().to_string(),
            output_type: std::any::type_name::<Resp>().to_string(),
        }
    }

    /// The HTTP/2 `:path` for this method: `/<service>/<method>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// A registered method: its descriptor and the handler that serves it.
pub struct RegisteredMethod {
    pub descriptor: MethodDescriptor,
    pub(crate) handler: Handler,
}

/// Every method a server can serve, keyed by path.
///
/// Filled in before the server starts; shared read-only by connections.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method of `service`. A later registration of the
    /// same path replaces the earlier one.
    pub fn add_service(&mut self, service: Service) {
        for (descriptor, handler) in service.into_methods() {
            let path = descriptor.path();
            tracing::debug!(%path, cardinality = %descriptor.cardinality, "registered method");
            self.methods.insert(
                path,
                RegisteredMethod {
                    descriptor,
                    handler,
                },
            );
        }
    }

    pub fn get(&self, path: &str) -> Option<&RegisteredMethod> {
        self.methods.get(path)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(|m| &m.descriptor)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[test]
    fn test_descriptor_path() {
        let descriptor =
            MethodDescriptor::new::<String, Vec<u8>>("pkg.Echo", "Say", Cardinality::UnaryStream);
        assert_eq!(descriptor.path(), "/pkg.Echo/Say");
        assert!(descriptor.input_type.ends_with("String"));
        assert_eq!(descriptor.cardinality.to_string(), "unary-stream");
    }

    #[test]
    fn test_registry_lookup() {
        let service = Service::new("pkg.Echo")
            .unary_unary("Say", |req: String, _ctx| Ok::<_, Status>(req))
            .stream_stream("Chat", |reqs: crate::Streaming<String>, _ctx| {
                Ok::<_, Status>(reqs)
            });

        let mut registry = MethodRegistry::new();
        registry.add_service(service);

        assert_eq!(registry.len(), 2);
        let chat = registry.get("/pkg.Echo/Chat").unwrap();
        assert_eq!(chat.descriptor.cardinality, Cardinality::StreamStream);
        assert!(registry.get("/pkg.Echo/Missing").is_none());
        assert!(registry.get("pkg.Echo/Say").is_none());
    }
}
