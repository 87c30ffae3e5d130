use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wireline::{Handler, HandlerError, RequestContext, Server};

struct MyHandler;

impl Handler for MyHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        ctx.response.write("Hello, world!")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(MyHandler)
        .build()
        .launch()
        .await;
}
