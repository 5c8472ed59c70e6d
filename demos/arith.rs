//! Arithmetic service over TCP.
//!
//! ```text
//! cargo run --example arith -- server   # listen on 127.0.0.1:1234
//! cargo run --example arith -- client   # call a running server
//! cargo run --example arith             # both, in one process
//! ```

use ferry::schema::Describe;
use ferry::{Client, RemoteError, Server, ServiceDefinition, ServiceSchema, TypeDesc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

const ADDR: &str = "127.0.0.1:1234";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Args {
    a: i64,
    b: i64,
}

impl Describe for Args {
    fn describe() -> TypeDesc {
        TypeDesc::Map
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Quotient {
    quo: i64,
    rem: i64,
}

impl Describe for Quotient {
    fn describe() -> TypeDesc {
        TypeDesc::Map
    }
}

struct Arith;

async fn run_server(listener: TcpListener) -> ferry::Result<()> {
    let server = Server::new();
    server.register(
        ServiceDefinition::new(Arith)
            .method_typed("Multiply", |_, (args,): (Args,)| async move {
                Ok::<_, RemoteError>(args.a * args.b)
            })
            .method_typed("Divide", |_, (args,): (Args,)| async move {
                if args.b == 0 {
                    return Err(RemoteError::new("divide by zero"));
                }
                Ok(Some(Quotient {
                    quo: args.a / args.b,
                    rem: args.a % args.b,
                }))
            }),
    )?;

    tracing::info!("start the ferry server on {}", ADDR);
    server.serve(listener).await
}

async fn run_client() -> ferry::Result<()> {
    let client = Client::builder().dial(ADDR).await?;
    let arith = client.proxy(
        ServiceSchema::new("Arith")
            .method_typed::<(Args,), i64>("Multiply")
            .method_typed::<(Args,), Option<Quotient>>("Divide"),
    )?;

    let mut proxies = arith.method_names().collect::<Vec<_>>();
    proxies.sort_unstable();
    tracing::info!(methods = ?proxies, "proxy ready");

    let args = Args { a: 10, b: 5 };
    if let Some(multiply) = arith.method("Multiply") {
        let (mul, err): (i64, Option<RemoteError>) = multiply.invoke((&args,)).await?;
        match err {
            None => tracing::info!("{} * {} = {}", args.a, args.b, mul),
            Some(e) => tracing::error!("Multiply failed: {}", e),
        }
    }

    if let Some(divide) = arith.method("Divide") {
        for args in [Args { a: 17, b: 5 }, Args { a: 1, b: 0 }] {
            let (quo, err): (Option<Quotient>, Option<RemoteError>) =
                divide.invoke((&args,)).await?;
            match (quo, err) {
                (_, Some(e)) => tracing::warn!("{} / {} failed: {}", args.a, args.b, e),
                (Some(q), None) => {
                    tracing::info!("{} / {} = {} rem {}", args.a, args.b, q.quo, q.rem)
                }
                (None, None) => tracing::warn!("{} / {} returned nothing", args.a, args.b),
            }
        }
    }

    client.close().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    match std::env::args().nth(1).as_deref() {
        Some("server") => {
            let listener = TcpListener::bind(ADDR).await?;
            run_server(listener).await?;
        }
        Some("client") => run_client().await?,
        _ => {
            let listener = TcpListener::bind(ADDR).await?;
            tokio::spawn(async move {
                if let Err(e) = run_server(listener).await {
                    tracing::error!("server stopped: {}", e);
                }
            });
            run_client().await?;
        }
    }

    Ok(())
}
