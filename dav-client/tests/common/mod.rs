use std::net::SocketAddr;

use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

pub type Handler = fn(Request<Bytes>) -> Response<Full<Bytes>>;

/// Serve `handler` over HTTP/1 on a loopback port until the test ends
pub async fn serve(handler: Handler) -> SocketAddr {
    let tcp = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = tcp.local_addr().expect("local address");

    tokio::spawn(async move {
        loop {
            let (socket, _) = match tcp.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let (parts, body) = req.into_parts();
                    let body = body.collect().await?.to_bytes();
                    Ok::<_, hyper::Error>(handler(Request::from_parts(parts, body)))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), service)
                    .await;
            });
        }
    });

    addr
}

pub fn reply(status: u16, headers: &[(&str, &str)], body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (k, v) in headers.iter() {
        builder = builder.header(*k, *v);
    }
    builder.body(Full::new(body.into())).expect("valid response")
}
