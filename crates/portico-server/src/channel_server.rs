//! TCP server for the channel protocol.
//!
//! Each connection is split into a read loop and a writer task. The read
//! loop decodes call frames and spawns one task per call; finished calls
//! hand their reply frame to the writer over a channel, so replies may go
//! out in any order. A frame the server cannot parse, or a frame that is
//! not a call, gets a protocol-error frame and closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use portico_config::GatewayConfig;
use portico_core::SystemErrorCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer_pool::BufferPool;
use crate::channel_router::ChannelRouter;
use crate::error::{ServerError, ServerResult};
use crate::frame::{read_frame, write_frame, ErrorFrame, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

const REPLY_QUEUE: usize = 256;

/// Serves a [`ChannelRouter`] over TCP.
#[derive(Debug, Clone)]
pub struct ChannelServer {
    router: Arc<ChannelRouter>,
    pool: BufferPool,
    max_frame_size: usize,
    shutdown_timeout: Duration,
}

impl ChannelServer {
    /// Creates a server with default limits.
    #[must_use]
    pub fn new(router: ChannelRouter) -> Self {
        Self {
            router: Arc::new(router),
            pool: BufferPool::new(64),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Creates a server using the `channel` and `shutdown` sections.
    #[must_use]
    pub fn from_config(router: ChannelRouter, config: &GatewayConfig) -> Self {
        Self {
            router: Arc::new(router),
            pool: BufferPool::new(config.channel.buffer_pool_size),
            max_frame_size: config.channel.max_frame_size,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Sets the largest accepted frame.
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Sets the drain budget.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Binds `addr` and serves until `shutdown` fires.
    pub async fn run_with_shutdown(&self, addr: &str, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(addr.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires, then
    /// waits for open connections to drain.
    pub async fn serve(&self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, methods = self.router.methods().len(), "Channel server listening");

        let tracker = ConnectionTracker::new();
        let mut stop = shutdown.recv();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "Failed to accept channel connection");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let token = tracker.acquire();
                    let server = self.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        server.serve_connection(stream, peer, shutdown).await;
                        drop(token);
                    });
                }
                () = &mut stop => {
                    info!("Channel server stopped accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        if tokio::time::timeout(self.shutdown_timeout, tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                active = tracker.active_connections(),
                "Channel connections still open after the shutdown timeout"
            );
        }
        Ok(())
    }

    async fn serve_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: ShutdownSignal) {
        debug!(peer = %peer, "Channel connection opened");
        let (reader, writer) = stream.into_split();
        self.serve_io(reader, writer, shutdown).await;
        debug!(peer = %peer, "Channel connection closed");
    }

    /// Drives one connection over any reader and writer pair.
    pub async fn serve_io<R, W>(&self, mut reader: R, writer: W, shutdown: ShutdownSignal)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (replies, outbox) = mpsc::channel::<Frame>(REPLY_QUEUE);
        let writer_task = tokio::spawn(write_replies(
            writer,
            outbox,
            self.pool.clone(),
            self.max_frame_size,
        ));

        let mut stop = shutdown.recv();
        let mut buf = self.pool.get();
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader, &mut *buf, self.max_frame_size) => frame,
                () = &mut stop => break,
            };
            match frame {
                Ok(Some(Frame::Call(call))) => {
                    let router = Arc::clone(&self.router);
                    let pool = self.pool.clone();
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = router.dispatch(call, &pool).await {
                            send_reply(&replies, reply).await;
                        }
                    });
                }
                Ok(Some(other)) => {
                    let message = format!("unexpected frame {} from client", other.id());
                    warn!(frame_id = other.id(), "Received a non-call frame on a channel connection");
                    let reply = ErrorFrame::new(other.id(), SystemErrorCode::ProtocolError, message);
                    send_reply(&replies, Frame::Error(reply)).await;
                    break;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Could not read a channel frame");
                    let reply = ErrorFrame::new(0, SystemErrorCode::ProtocolError, err.to_string());
                    send_reply(&replies, Frame::Error(reply)).await;
                    break;
                }
            }
        }
        drop(buf);

        // In-flight calls keep their sender clones; the writer exits once
        // the last one has replied.
        drop(replies);
        if let Err(err) = writer_task.await {
            warn!(error = %err, "Channel writer task failed");
        }
    }
}

/// Queues `reply` for the writer task. Returns false when the writer has
/// already exited and the reply was dropped.
async fn send_reply(replies: &mpsc::Sender<Frame>, reply: Frame) -> bool {
    match replies.send(reply).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(dropped)) => {
            debug!(frame_id = dropped.id(), "Dropped a channel reply, the connection writer has exited");
            false
        }
    }
}

async fn write_replies<W>(mut writer: W, mut outbox: mpsc::Receiver<Frame>, pool: BufferPool, max_frame_size: usize)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = pool.get();
    while let Some(frame) = outbox.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame, &mut *buf, max_frame_size).await {
            warn!(error = %err, frame_id = frame.id(), "Could not write a channel frame");
            if !matches!(frame, Frame::Error(_)) {
                let fallback = Frame::Error(ErrorFrame::new(
                    frame.id(),
                    SystemErrorCode::UnexpectedError,
                    err.to_string(),
                ));
                if write_frame(&mut writer, &fallback, &mut *buf, max_frame_size).await.is_ok() {
                    continue;
                }
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CallFrame;
    use portico_core::wire::{self, Value};
    use portico_middleware::{channel_handler_fn, ChannelResponse, ChannelStack};
    use tokio::io::AsyncWriteExt;

    fn echo_router() -> ChannelRouter {
        let mut router = ChannelRouter::default();
        router
            .register(
                "Echo::echo",
                "echo",
                "echo",
                ChannelStack::bare(channel_handler_fn(|ctx, req| {
                    Box::pin(async move { Ok((ctx, ChannelResponse::ok(req.body.clone()))) })
                })),
            )
            .unwrap();
        router
    }

    fn echo_call(id: u32) -> Frame {
        let mut arg2 = BytesMut::new();
        wire::write_headers(&mut arg2, &indexmap::IndexMap::new()).unwrap();
        let mut arg3 = BytesMut::new();
        Value::Struct(Vec::new()).encode(&mut arg3);
        Frame::Call(CallFrame {
            id,
            method: "Echo::echo".to_string(),
            ttl: Duration::from_secs(1),
            arg2: arg2.freeze(),
            arg3: arg3.freeze(),
        })
    }

    #[tokio::test]
    async fn test_calls_are_answered_on_the_same_connection() {
        let server = ChannelServer::new(echo_router());
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn({
            let server = server.clone();
            let shutdown = shutdown.clone();
            async move { server.serve_io(server_read, server_write, shutdown).await }
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let mut buf = BytesMut::new();
        for id in [1, 2] {
            write_frame(&mut client_write, &echo_call(id), &mut buf, DEFAULT_MAX_FRAME_SIZE)
                .await
                .unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..2 {
            match read_frame(&mut client_read, &mut buf, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
                Some(Frame::Response(res)) => ids.push(res.id),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        client_write.shutdown().await.unwrap();
        drop(client_write);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_call_frame_is_a_protocol_error() {
        let server = ChannelServer::new(echo_router());
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let task = tokio::spawn({
            let server = server.clone();
            async move { server.serve_io(server_read, server_write, ShutdownSignal::new()).await }
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let mut buf = BytesMut::new();
        let stray = Frame::Error(ErrorFrame::new(4, SystemErrorCode::Busy, "busy"));
        write_frame(&mut client_write, &stray, &mut buf, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        match read_frame(&mut client_read, &mut buf, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            Some(Frame::Error(err)) => {
                assert_eq!(err.id, 4);
                assert_eq!(err.code, SystemErrorCode::ProtocolError);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reply_after_writer_exit_is_dropped() {
        let (replies, outbox) = mpsc::channel::<Frame>(1);
        drop(outbox);
        let reply = Frame::Error(ErrorFrame::new(9, SystemErrorCode::Busy, "busy"));
        assert!(!send_reply(&replies, reply).await);

        let (replies, mut outbox) = mpsc::channel::<Frame>(1);
        assert!(send_reply(&replies, echo_call(10)).await);
        assert_eq!(outbox.recv().await.map(|f| f.id()), Some(10));
    }

    #[tokio::test]
    async fn test_serve_drains_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ChannelServer::new(echo_router()).with_shutdown_timeout(Duration::from_secs(1));
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { server.serve(listener, shutdown).await }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = BytesMut::new();
        write_frame(&mut stream, &echo_call(11), &mut buf, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let reply = read_frame(&mut stream, &mut buf, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert!(matches!(reply, Some(Frame::Response(ref r)) if r.id == 11 && !r.app_error));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
