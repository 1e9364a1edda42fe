use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{pin_mut, ready, AsyncWrite, AsyncWriteExt};
use pin_project::pin_project;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EscapingDataWriterState {
    Start,
    Cr,
    CrLf,
    // The escaping dot has been written, but not the dot it escapes
    Escaped,
}

impl EscapingDataWriterState {
    #[inline]
    fn after(self, b: u8) -> EscapingDataWriterState {
        use EscapingDataWriterState::*;
        match (self, b) {
            (_, b'\r') => Cr,
            (Cr, b'\n') => CrLf,
            _ => Start,
        }
    }
}

/// `AsyncWrite` instance that takes an unescaped `DATA` stream and
/// escapes it.
///
/// Every line (as defined by b"\r\n" endings) that starts with a b'.' gets
/// an additional b'.' prepended, and `finish` writes the end-of-data marker.
/// Callers are expected to have normalized line endings to CRLF already.
#[pin_project]
pub struct EscapingDataWriter<W> {
    state: EscapingDataWriterState,

    #[pin]
    write: W,
}

impl<W> EscapingDataWriter<W>
where
    W: AsyncWrite,
{
    #[inline]
    pub fn new(write: W) -> Self {
        EscapingDataWriter {
            state: EscapingDataWriterState::CrLf,
            write,
        }
    }

    /// Terminates the message with `.` on a line of its own, adding the
    /// missing CRLF if the data did not end with one.
    #[inline]
    pub async fn finish(self) -> io::Result<()> {
        let write = self.write;
        pin_mut!(write);
        match self.state {
            EscapingDataWriterState::CrLf => write.write_all(b".\r\n").await,
            _ => write.write_all(b"\r\n.\r\n").await,
        }
    }
}

impl<W> AsyncWrite for EscapingDataWriter<W>
where
    W: AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        if buf.is_empty() {
            return this.write.poll_write(cx, buf);
        }

        if *this.state == EscapingDataWriterState::CrLf && buf[0] == b'.' {
            match ready!(this.write.as_mut().poll_write(cx, b".")) {
                Ok(0) => return Poll::Ready(Err(io::ErrorKind::WriteZero.into())),
                Ok(_) => *this.state = EscapingDataWriterState::Escaped,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }

        // Only pass through data up to the next dot that needs escaping
        let mut state = *this.state;
        let mut end = buf.len();
        for (i, &b) in buf.iter().enumerate() {
            if i > 0 && state == EscapingDataWriterState::CrLf && b == b'.' {
                end = i;
                break;
            }
            state = state.after(b);
        }

        let written = ready!(this.write.poll_write(cx, &buf[..end]))?;
        for &b in &buf[..written] {
            *this.state = this.state.after(b);
        }
        Poll::Ready(Ok(written))
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        self.project().write.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::Other,
            "tried closing a stream during a message",
        )))
    }
}
