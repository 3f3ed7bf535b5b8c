//! Wraps an accepted connection to stamp last-read/last-write timestamps
//! on every I/O call.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::attr::Timestamp;

pub struct TrackedConn<S> {
    inner: S,
    pub local: String,
    pub remote: String,
    last_read: Arc<Mutex<Timestamp>>,
    last_write: Arc<Mutex<Timestamp>>,
}

impl<S> TrackedConn<S> {
    pub fn new(inner: S, local: String, remote: String) -> Self {
        let now = Timestamp::now();
        TrackedConn {
            inner,
            local,
            remote,
            last_read: Arc::new(Mutex::new(now)),
            last_write: Arc::new(Mutex::new(now)),
        }
    }

    pub fn last_read(&self) -> Timestamp {
        *self.last_read.lock().unwrap()
    }

    pub fn last_write(&self) -> Timestamp {
        *self.last_write.lock().unwrap()
    }

    /// Shared handles onto the activity timestamps, for a registry that
    /// outlives this connection's own read/write task.
    pub fn activity_handles(&self) -> (Arc<Mutex<Timestamp>>, Arc<Mutex<Timestamp>>) {
        (self.last_read.clone(), self.last_write.clone())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() && buf.filled().len() > before {
            *this.last_read.lock().unwrap() = Timestamp::now();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            if *n > 0 {
                *this.last_write.lock().unwrap() = Timestamp::now();
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn read_and_write_stamp_timestamps() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut tracked = TrackedConn::new(a, "local".into(), "remote".into());
        let initial_read = tracked.last_read();
        let initial_write = tracked.last_write();

        tokio::spawn(async move {
            b.write_all(b"hi").await.unwrap();
        });
        let mut buf = [0u8; 2];
        tracked.read_exact(&mut buf).await.unwrap();
        assert!(tracked.last_read() >= initial_read);

        tracked.write_all(b"ok").await.unwrap();
        assert!(tracked.last_write() >= initial_write);
    }
}
