use std::path::{Component, Path, PathBuf};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wireline::{
    limits::RespLimits, FileRef, Handler, HandlerError, Method, RequestContext, Server, StatusCode,
};

struct FileServer {
    root: PathBuf,
}

/// `bytes=a-b` with both bounds present.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (begin, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((begin.trim().parse().ok()?, end.trim().parse().ok()?))
}

impl FileServer {
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }

        Some(self.root.join(relative))
    }
}

impl Handler for FileServer {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        if !matches!(ctx.request.method(), Method::Get | Method::Head) {
            ctx.response
                .status(StatusCode::MethodNotAllowed)
                .header("Allow", "GET, HEAD");
            return Ok(());
        }

        let Some(path) = self.resolve(ctx.request.path()) else {
            ctx.response.status(StatusCode::BadRequest);
            return Ok(());
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                ctx.response.status(StatusCode::NotFound);
                ctx.response.write("not found")?;
                return Ok(());
            }
        }

        let mut file = FileRef::new(path).via_send_file(true);
        if let Some((begin, end)) = ctx.request.headers().get_last("Range").and_then(parse_range) {
            file = file.range(begin, end);
        }

        ctx.response.header("Accept-Ranges", "bytes");
        ctx.response.write_file(file)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_owned());

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(FileServer { root: root.into() })
        .response_limits(RespLimits {
            enable_compression: true,
            ..RespLimits::default()
        })
        .build()
        .launch()
        .await;
}
