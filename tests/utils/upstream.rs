use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

/// A real HTTP server standing in for a remote service. It answers every request with
/// `200 OK` and remembers the headers it received.
pub struct Upstream {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Upstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let recorder = received.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => continue,
                };
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| answer(recorder.clone(), req));
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, received }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn received(&self) -> Vec<HeaderMap> {
        self.received.lock().unwrap().clone()
    }
}

async fn answer(
    recorder: Arc<Mutex<Vec<HeaderMap>>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    recorder.lock().unwrap().push(parts.headers);

    let text = if body.is_empty() {
        "200 OK".to_string()
    } else {
        format!("200 OK {}", String::from_utf8_lossy(&body))
    };

    Ok(Response::builder()
        .status(200)
        .header("content-type", "text/plain")
        .header("set-cookie", "session=abc")
        .header("x-upstream", "yes")
        .body(Full::new(Bytes::from(text)))
        .unwrap())
}
