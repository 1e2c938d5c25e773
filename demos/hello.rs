//! A small JSON/text service showing every send operation.
//!
//! ```text
//! RUST_LOG=switchyard=debug cargo run --example hello -- 127.0.0.1:8080 [config.toml]
//! ```

use serde::Serialize;
use switchyard::{HandlerResult, RequestContext, Router, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Greeting<'a> {
    greeting: &'a str,
    name: &'a str,
}

async fn hello(mut ctx: RequestContext) -> HandlerResult {
    let name = ctx.param("name").unwrap_or("world").to_owned();
    let greeting = match ctx.query_param("lang").as_deref() {
        Some("fr") => "Bonjour",
        Some("es") => "Hola",
        _ => "Hello",
    };
    ctx.send_json(&Greeting {
        greeting,
        name: &name,
    })?;
    Ok(())
}

async fn inspect(mut ctx: RequestContext) -> HandlerResult {
    let agent = ctx.header("user-agent").unwrap_or("unknown").to_owned();
    let count = ctx.header_count();
    ctx.add_header("X-Header-Count", count.to_string())?;
    ctx.send_text(format!("{count} headers, user agent: {agent}"))?;
    Ok(())
}

async fn echo(mut ctx: RequestContext) -> HandlerResult {
    let content_type = ctx
        .header("content-type")
        .unwrap_or("application/octet-stream")
        .to_owned();
    let body = ctx.body().await.unwrap_or_default();
    ctx.send_bytes(content_type, body)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_owned());
    let config = match args.next() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let mut router = Router::new();
    router.get("/hello", hello)?;
    router.get("/hello/:name", hello)?;
    router.get("/inspect", inspect)?;
    router.post("/echo", echo)?;
    router.put("/echo", echo)?;

    router.start_with_config(&address, config)?;
    Ok(())
}
