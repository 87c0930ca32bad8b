//! Server wiring: merges the namespaces into one RPC module and serves it
//! with optional CORS and a `/health` proxy.

use crate::impls::{ContractNamespace, NodeTestNamespace, TorrentNamespace};
use http::Method;
use jsonrpsee::server::middleware::http::ProxyGetRequestLayer;
use jsonrpsee::server::{AlreadyStoppedError, RpcServiceBuilder, ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use torrent_node_core::node::Node;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct NodeServerBuilder {
    node: Node,
    cors_enabled: bool,
    health_api_enabled: bool,
    allow_origin: AllowOrigin,
}

impl NodeServerBuilder {
    pub fn new(node: Node) -> NodeServerBuilder {
        NodeServerBuilder {
            node,
            cors_enabled: false,
            health_api_enabled: true,
            allow_origin: AllowOrigin::any(),
        }
    }

    pub fn enable_cors(mut self) -> NodeServerBuilder {
        self.cors_enabled = true;
        self
    }

    pub fn set_allow_origin(mut self, allow_origin: AllowOrigin) -> NodeServerBuilder {
        self.allow_origin = allow_origin;
        self
    }

    fn rpc_module(&self) -> RpcModule<()> {
        use torrent_node_api_decl::{
            ContractNamespaceServer, NodeTestNamespaceServer, TorrentNamespaceServer,
        };
        let mut rpc = RpcModule::new(());
        rpc.merge(TorrentNamespace::new(self.node.clone()).into_rpc())
            .expect("torrent namespace methods are distinct");
        rpc.merge(ContractNamespace::new(self.node.clone()).into_rpc())
            .expect("contract namespace methods are distinct");
        rpc.merge(NodeTestNamespace::new(self.node.clone()).into_rpc())
            .expect("node-test namespace methods are distinct");
        rpc
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<NodeServerHandle> {
        let cors_layer = tower::util::option_layer(self.cors_enabled.then(|| {
            // CorsLayer only adds the response headers; filtering is done
            // by the browser honoring them.
            CorsLayer::new()
                .allow_origin(self.allow_origin.clone())
                .allow_headers([http::header::CONTENT_TYPE])
                .allow_methods([Method::GET, Method::POST])
        }));
        let health_layer = tower::util::option_layer(
            self.health_api_enabled
                .then(|| ProxyGetRequestLayer::new("/health", "status").expect("static path")),
        );

        let server = ServerBuilder::default()
            .http_only()
            .set_http_middleware(
                tower::ServiceBuilder::new()
                    .layer(cors_layer)
                    .layer(health_layer),
            )
            .set_rpc_middleware(RpcServiceBuilder::new().rpc_logger(100))
            .build(addr)
            .await?;
        let local_addr = server.local_addr()?;
        let handle = server.start(self.rpc_module());
        tracing::info!(addr = %local_addr, "query surface listening");
        Ok(NodeServerHandle {
            handle,
            local_addr,
        })
    }
}

/// Running server; the socket stays open until `stop` or drop.
#[derive(Clone)]
pub struct NodeServerHandle {
    handle: ServerHandle,
    local_addr: SocketAddr,
}

impl NodeServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) -> Result<(), AlreadyStoppedError> {
        self.handle.stop()
    }

    pub async fn stopped(self) {
        self.handle.stopped().await
    }
}
