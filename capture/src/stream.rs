use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::client::connect::{Connected, Connection};
use hyper::service::Service;
use hyper::Uri;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::recorder::Recorder;
use crate::scope::{self, CaptureScope};

/// Transport decorator: wraps a hyper connector so that, whenever a capture
/// scope is active on the connecting task, the returned connection tees
/// every byte through a fresh [`Recorder`]. With no scope active it is a
/// plain passthrough.
#[derive(Clone)]
pub struct RecordingConnector<C> {
    inner: C,
}

impl<C> RecordingConnector<C> {
    pub fn new(inner: C) -> RecordingConnector<C> {
        RecordingConnector { inner }
    }
}

impl<C> Service<Uri> for RecordingConnector<C>
where
    C: Service<Uri>,
    C::Response: AsyncRead + AsyncWrite + Connection + PeerAddr + Unpin + Send + 'static,
    C::Future: Send + 'static,
{
    type Response = RecordingStream<C::Response>;
    type Error = C::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        // The scope is read here, on the caller's task, so it travels with
        // the connection for its whole lifetime.
        let scope = scope::current();
        let connect = self.inner.call(dst.clone());

        Box::pin(async move {
            let io = connect.await?;

            let (recorder, scope) = match (scope, origin_of(&dst)) {
                (Some(scope), Some(origin)) => {
                    let mut recorder = Recorder::new(origin);
                    recorder.set_remote_addr(io.peer_addr());
                    scope.register();
                    (Some(recorder), Some(scope))
                }
                (Some(_), None) => {
                    warn!(uri = %dst, "connection target has no origin; not recording");
                    (None, None)
                }
                (None, _) => (None, None),
            };

            Ok(RecordingStream {
                inner: Some(io),
                recorder,
                scope,
            })
        })
    }
}

fn origin_of(uri: &Uri) -> Option<String> {
    let scheme = uri.scheme_str().unwrap_or("http");
    let authority = uri.authority()?;
    Some(format!("{scheme}://{authority}"))
}

/// Access to the remote peer of a connection stream, through however many
/// wrapping layers the connector stack adds.
pub trait PeerAddr {
    fn peer_addr(&self) -> Option<SocketAddr>;
}

impl PeerAddr for tokio::net::TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self).ok()
    }
}

impl<T: PeerAddr> PeerAddr for hyper_rustls::MaybeHttpsStream<T> {
    fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            hyper_rustls::MaybeHttpsStream::Http(stream) => stream.peer_addr(),
            hyper_rustls::MaybeHttpsStream::Https(tls) => tls.get_ref().0.peer_addr(),
        }
    }
}

/// A connection whose reads and writes are mirrored into a [`Recorder`].
/// Dropping the stream finalizes the recording on a background task: the
/// response remainder is drained (bounded), the recorder is closed, and the
/// finished capture is handed to the scope's sink. Errors on that path are
/// logged and never reach the HTTP caller.
pub struct RecordingStream<T: AsyncRead + Unpin + Send + 'static> {
    inner: Option<T>,
    recorder: Option<Recorder>,
    scope: Option<Arc<CaptureScope>>,
}

impl<T: AsyncRead + Unpin + Send + 'static> RecordingStream<T> {
    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "stream already closed")
    }
}

impl<T> AsyncWrite for RecordingStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(Self::closed()));
        };

        match Pin::new(inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                if let Some(recorder) = this.recorder.as_mut() {
                    if let Err(e) = recorder.record_request(&buf[..written]) {
                        recorder.mark_incomplete();
                        return Poll::Ready(Err(e));
                    }
                }
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(Self::closed()));
        };
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        Pin::new(inner).poll_shutdown(cx)
    }
}

impl<T> AsyncRead for RecordingStream<T>
where
    T: AsyncRead + Unpin + Send + 'static,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(Self::closed()));
        };

        let already_filled = buf.filled().len();
        match Pin::new(inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if let Some(recorder) = this.recorder.as_mut() {
                    let fresh = &buf.filled()[already_filled..];
                    if !fresh.is_empty() {
                        if let Err(e) = recorder.record_response(fresh) {
                            // A spill failure loses the capture, never the
                            // caller's bytes.
                            debug!(error = %e, "capture buffer failed; abandoning recording");
                            recorder.mark_incomplete();
                        }
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                if let Some(recorder) = this.recorder.as_mut() {
                    recorder.mark_incomplete();
                }
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Connection for RecordingStream<T>
where
    T: AsyncRead + Connection + Unpin + Send + 'static,
{
    fn connected(&self) -> Connected {
        match self.inner.as_ref() {
            Some(io) => io.connected(),
            None => Connected::new(),
        }
    }
}

impl<T: AsyncRead + Unpin + Send + 'static> Drop for RecordingStream<T> {
    fn drop(&mut self) {
        let (Some(recorder), Some(scope)) = (self.recorder.take(), self.scope.take()) else {
            return;
        };
        let inner = self.inner.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(finalize(inner, recorder, scope));
            }
            Err(_) => {
                warn!("recording dropped outside a runtime; capture discarded");
                scope.complete();
            }
        }
    }
}

async fn finalize<T>(io: Option<T>, mut recorder: Recorder, scope: Arc<CaptureScope>)
where
    T: AsyncRead + Unpin + Send + 'static,
{
    if let Some(io) = io {
        drain_remainder(io, &mut recorder, &scope).await;
    }

    if let Some(capture) = recorder.finish(OffsetDateTime::now_utc()) {
        scope.sink().accept(capture).await;
    }
    scope.complete();
}

/// Pulls whatever the caller left unread into the recorder before the socket
/// is released, bounded by the scope's byte cap and timeout. Read errors at
/// this point are connection teardown; the recorder's framing check decides
/// whether the capture survives.
async fn drain_remainder<T>(mut io: T, recorder: &mut Recorder, scope: &CaptureScope)
where
    T: AsyncRead + Unpin + Send + 'static,
{
    if recorder.is_incomplete() {
        return;
    }

    let settings = scope.settings().clone();
    let drained = tokio::time::timeout(settings.drain_timeout, async {
        let mut remaining = settings.drain_cap;
        let mut chunk = [0u8; 8192];

        loop {
            match io.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if recorder.record_response(&chunk[..n]).is_err() {
                        recorder.mark_incomplete();
                        break;
                    }
                    remaining = remaining.saturating_sub(n);
                    if remaining == 0 {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("drain timed out; proceeding with what was recorded");
    }
}
