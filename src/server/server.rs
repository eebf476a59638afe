use bytes::Buf;
use futures_util::FutureExt;
use http::{header::CONNECTION, Request, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    service::service_fn,
    Response,
};
use hyper_util::{
    rt::{tokio::TokioIo, TokioExecutor},
    server::conn::auto::Builder as ServerBuilder,
};
use std::{
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{ready, Context, Poll},
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::oneshot::Sender,
    task::spawn,
};

use crate::common::data::RawResponse;
use crate::server::{
    handler,
    handler::Handler,
    server::Error::{
        BufferError, LocalSocketAddrError, PublishSocketAddrError, RouterError, SocketBindError,
    },
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBindError(SocketAddr, std::io::Error),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(std::io::Error),
    #[error("cannot send reserved TCP address to test thread {0}")]
    PublishSocketAddrError(SocketAddr),
    #[error("buffering error: {0}")]
    BufferError(hyper::Error),
    #[error("HTTP error: {0}")]
    HTTPError(#[from] http::Error),
    #[error("cannot process request: {0}")]
    RouterError(#[from] handler::Error),
    #[error("Server error: {0}")]
    ServerConnectionError(Box<dyn std::error::Error + Send + Sync>),
    #[error("server stopped before publishing its address")]
    NotStarted,
}

pub struct MockEndpointConfig {
    pub host: IpAddr,
    pub port: u16,
}

/// The listening side of a mock session. Accepts TCP connections, serves HTTP on them and
/// hands every buffered request to a [Handler].
pub struct MockEndpoint<H>
where
    H: Handler + Send + Sync + 'static,
{
    handler: Box<H>,
    config: MockEndpointConfig,
}

impl<H> MockEndpoint<H>
where
    H: Handler + Send + Sync + 'static,
{
    pub fn new(handler: Box<H>, config: MockEndpointConfig) -> Self {
        MockEndpoint { handler, config }
    }

    /// Binds the listener, publishes the bound address through `socket_addr_sender` and
    /// serves until `shutdown` resolves.
    pub async fn start_with_signals<F>(
        self,
        socket_addr_sender: Option<Sender<SocketAddr>>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SocketBindError(addr, e))?;
        let addr = listener.local_addr().map_err(LocalSocketAddrError)?;

        if let Some(sender) = socket_addr_sender {
            sender.send(addr).map_err(PublishSocketAddrError)?;
        }

        tracing::info!("Listening on {}", addr);
        self.run_accept_loop(listener, shutdown).await
    }

    pub async fn run_accept_loop<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let shutdown = shutdown.shared();
        let server = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((tcp_stream, remote_address)) => {
                            let server = server.clone();
                            spawn(async move {
                               if let Err(err) = server.handle_tcp_stream(tcp_stream, remote_address).await {
                                    tracing::error!("{:?}", err);
                                }
                            });
                        },
                        Err(err) =>  {
                            tracing::error!("TCP error: {:?}", err);
                        },
                    };
                }
                _ = shutdown.clone() => {
                    tracing::debug!("No longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn service(
        self: Arc<Self>,
        req: Request<Incoming>,
        raw: RawSlot,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
        tracing::trace!("New HTTP request received: {}", req.uri());

        let req = match buffer_request(req).await {
            Ok(req) => req,
            Err(err) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, BufferError(err));
            }
        };

        match self.handler.handle(req).await {
            Ok(response) => match response.extensions().get::<RawResponse>() {
                Some(RawResponse(bytes)) => {
                    tracing::debug!("Writing {} raw response bytes", bytes.len());
                    *raw.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.clone());
                    Ok(Response::builder()
                        .header(CONNECTION, "close")
                        .body(full(Bytes::new()))?)
                }
                None => to_service_response(response),
            },
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, RouterError(err)),
        }
    }

    async fn handle_tcp_stream(
        self: Arc<Self>,
        tcp_stream: TcpStream,
        remote_address: SocketAddr,
    ) -> Result<(), Error> {
        tracing::trace!("new TCP connection incoming from {}", remote_address);
        serve_connection(self, tcp_stream).await
    }
}

fn serve_connection<H, S>(
    server: Arc<MockEndpoint<H>>,
    stream: S,
) -> impl Future<Output = Result<(), Error>> + Send + 'static
where
    H: Handler + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async move {
        let mut server_builder = ServerBuilder::new(TokioExecutor::new());
        server_builder.http1().preserve_header_case(true);

        let raw = RawSlot::default();
        let stream = RawOverride::new(stream, raw.clone());

        server_builder
            .serve_connection(
                TokioIo::new(stream),
                service_fn(|req| server.clone().service(req, raw.clone())),
            )
            .await
            .map_err(Error::ServerConnectionError)
    }
}

type RawSlot = Arc<Mutex<Option<Bytes>>>;

/// Connection IO that replaces the bytes hyper writes with a raw response once one is put
/// into its slot. Everything hyper writes afterwards is discarded.
struct RawOverride<S> {
    inner: S,
    slot: RawSlot,
    pending: Option<Bytes>,
    replaced: bool,
}

impl<S> RawOverride<S> {
    fn new(inner: S, slot: RawSlot) -> Self {
        Self {
            inner,
            slot,
            pending: None,
            replaced: false,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RawOverride<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RawOverride<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.replaced && this.pending.is_none() {
            this.pending = this
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }

        if let Some(pending) = this.pending.as_mut() {
            while pending.has_remaining() {
                let n = ready!(Pin::new(&mut this.inner).poll_write(cx, pending.chunk()))?;
                if n == 0 {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                pending.advance(n);
            }
            this.pending = None;
            this.replaced = true;
        }

        if this.replaced {
            return Poll::Ready(Ok(buf.len()));
        }

        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

async fn buffer_request(req: Request<Incoming>) -> Result<Request<Bytes>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Request::from_parts(parts, body))
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn error_response(
    code: StatusCode,
    err: Error,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    tracing::error!("failed to process request: {}", err);
    Ok(Response::builder()
        .status(code)
        .header("content-type", "text/plain; charset=utf-8")
        .body(full(err.to_string()))?)
}

fn to_service_response(
    response: Response<Bytes>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, full(body)))
}
