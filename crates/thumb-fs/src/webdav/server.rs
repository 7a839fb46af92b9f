//! HTTP listener for the WebDAV transport.

use super::ThumbDavFs;
use crate::vfs::VirtualFsResolver;
use dav_server::{fakels::FakeLs, DavHandler};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// A listener started by [`serve_background`].
pub struct ThumbWebDavServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ThumbWebDavServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://` URL a WebDAV client can mount.
    pub fn mount_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections. Connections already open run to completion.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve the overlay on `127.0.0.1:port` until accepting fails.
pub async fn serve(resolver: Arc<VirtualFsResolver>, port: u16) -> io::Result<()> {
    let (listener, handler) = bind(resolver, port).await?;
    info!("Serving thumbnails at http://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        accept(&handler, stream, peer);
    }
}

/// Serve the overlay from a spawned task. Port `0` picks a free port.
pub async fn serve_background(
    resolver: Arc<VirtualFsResolver>,
    port: u16,
) -> io::Result<ThumbWebDavServer> {
    let (listener, handler) = bind(resolver, port).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    info!("Serving thumbnails at http://{} (background)", addr);
    tokio::spawn(accept_until(listener, handler, shutdown_rx));

    Ok(ThumbWebDavServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}

async fn bind(
    resolver: Arc<VirtualFsResolver>,
    port: u16,
) -> io::Result<(TcpListener, DavHandler)> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    let handler = DavHandler::builder()
        .filesystem(Box::new(ThumbDavFs::new(resolver)))
        .locksystem(FakeLs::new())
        .build_handler();
    Ok((listener, handler))
}

async fn accept_until(
    listener: TcpListener,
    handler: DavHandler,
    shutdown: impl Future<Output = Result<(), oneshot::error::RecvError>>,
) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept(&handler, stream, peer),
                Err(e) => warn!("accept failed: {}", e),
            },
            _ = &mut shutdown => break,
        }
    }

    debug!("listener stopped");
}

fn accept(handler: &DavHandler, stream: TcpStream, peer: SocketAddr) {
    debug!("connection from {}", peer);
    let handler = handler.clone();

    tokio::spawn(async move {
        let service = service_fn(move |req| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            debug!("connection from {} ended: {}", peer, e);
        }
    });
}
