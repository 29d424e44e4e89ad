use crate::http::pool::{Pool, PooledConn};
use bytes::Bytes;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

struct Release {
    pool: Pool,
    key: String,
    conn: PooledConn,
}

/// Response body handed to callers.
///
/// Once the body reaches its end the connection goes back to the idle pool.
/// Dropping it earlier closes the connection instead.
pub struct TracedBody {
    inner: Incoming,
    release: Option<Box<Release>>,
}

impl TracedBody {
    pub(crate) fn new(inner: Incoming) -> Self {
        Self {
            inner,
            release: None,
        }
    }

    pub(crate) fn pooled(inner: Incoming, pool: Pool, key: String, conn: PooledConn) -> Self {
        let mut body = Self {
            inner,
            release: Some(Box::new(Release { pool, key, conn })),
        };
        // Nothing to read (HEAD, 204, empty bodies): free the connection now.
        if body.inner.is_end_stream() {
            body.release();
        }
        body
    }

    fn release(&mut self) {
        if let Some(r) = self.release.take() {
            debug!("Returning connection to pool: {}", r.key);
            r.pool.checkin(r.key, r.conn);
        }
    }
}

impl fmt::Debug for TracedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedBody")
            .field("pooled", &self.release.is_some())
            .finish()
    }
}

impl Body for TracedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_frame(cx);
        match &res {
            Poll::Ready(None) => this.release(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.release(),
            Poll::Ready(Some(Err(_))) => {
                this.release.take();
            }
            _ => {}
        }
        res
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
