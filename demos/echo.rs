use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wireline::{
    limits::{ConnLimits, ReqLimits},
    server::bind_listener,
    Handler, HandlerError, RequestContext, Server,
};

struct Echo;

impl Handler for Echo {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        let req = &ctx.request;

        let headers: Vec<_> = req.headers().iter().collect();
        let query: Vec<_> = req
            .query_params()
            .map(|params| params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect())
            .unwrap_or_default();

        let echo = json!({
            "method": req.method().as_str(),
            "target": req.target(),
            "path": req.path(),
            "query": query,
            "host": req.host(),
            "headers": headers,
            "body": String::from_utf8_lossy(req.body()),
            "peer": ctx.peer_addr().map(|addr| addr.to_string()),
        });

        ctx.response.write_json(&echo)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let listener = bind_listener("127.0.0.1:8080".parse().unwrap(), &Default::default()).unwrap();
    let server = Server::builder()
        .listener(listener)
        .handler(Echo)
        .connection_limits(ConnLimits {
            read_timeout: Duration::from_secs(5),
            ..ConnLimits::default()
        })
        .request_limits(ReqLimits {
            body_size: 64 * 1024,
            ..ReqLimits::default()
        })
        .build();

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.shutdown();
    });

    server.launch().await;
}
