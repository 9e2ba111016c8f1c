use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use axum::{BoxError, Error as AxumError, body::Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project::{pin_project, pinned_drop};

use super::error::SizeGuardError;
use super::filter::{FilterStatus, SizeGuardFilter};
use super::route::RouteLookup;

/// Write-once record of a rejection raised while the body was streaming.
#[derive(Debug, Clone, Default)]
pub(crate) struct RejectionSlot(Arc<OnceLock<SizeGuardError>>);

impl RejectionSlot {
    fn record(&self, error: SizeGuardError) {
        // The filter stops after its first rejection, so this only ever sets once.
        let _ = self.0.set(error);
    }

    pub(crate) fn get(&self) -> Option<SizeGuardError> {
        self.0.get().cloned()
    }
}

/// Request body that feeds every frame through a [`SizeGuardFilter`].
///
/// Frames that pass are forwarded unchanged. Dropping the body is the
/// request's teardown notification.
#[pin_project(PinnedDrop)]
pub struct SizeGuardBody<B, L: RouteLookup> {
    #[pin]
    inner: B,
    filter: SizeGuardFilter<L>,
    rejection: RejectionSlot,
}

impl<B, L: RouteLookup> SizeGuardBody<B, L> {
    pub(crate) fn new(inner: B, filter: SizeGuardFilter<L>, rejection: RejectionSlot) -> Self {
        Self {
            inner,
            filter,
            rejection,
        }
    }
}

#[pinned_drop]
impl<B, L: RouteLookup> PinnedDrop for SizeGuardBody<B, L> {
    fn drop(self: Pin<&mut Self>) {
        self.project().filter.on_request_complete();
    }
}

impl<B, L> HttpBody for SizeGuardBody<B, L>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
    L: RouteLookup,
{
    type Data = Bytes;
    type Error = AxumError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        if this.filter.is_stopped() {
            return Poll::Ready(None);
        }

        let frame = match ready!(this.inner.as_mut().poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Poll::Ready(Some(Err(AxumError::new(e)))),
            None => {
                // Stream ended without an end-of-stream data frame.
                this.filter.on_data(0, true);
                return Poll::Ready(None);
            }
        };

        let status = if let Some(data) = frame.data_ref() {
            let end_stream = this.inner.is_end_stream();
            this.filter.on_data(data.len() as u64, end_stream)
        } else if let Some(trailers) = frame.trailers_ref() {
            this.filter.on_trailers(trailers)
        } else {
            FilterStatus::Continue
        };

        match status {
            FilterStatus::Continue => Poll::Ready(Some(Ok(frame))),
            FilterStatus::StopAndRespond(error) => {
                this.rejection.record(error.clone());
                Poll::Ready(Some(Err(AxumError::new(error))))
            }
            FilterStatus::Stop => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.filter.is_stopped() || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Response body that fails once the request it answers has been rejected.
///
/// Used when the inner service responded before the request body crossed the
/// limit. The status line is already out by then, so the rejection surfaces as
/// a stream error and the connection is reset.
#[pin_project]
pub struct GuardedResponseBody<B> {
    #[pin]
    inner: B,
    rejection: RejectionSlot,
    failed: bool,
}

impl<B> GuardedResponseBody<B> {
    pub(crate) fn new(inner: B, rejection: RejectionSlot) -> Self {
        Self {
            inner,
            rejection,
            failed: false,
        }
    }
}

impl<B> HttpBody for GuardedResponseBody<B>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = AxumError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if *this.failed {
            return Poll::Ready(None);
        }
        if let Some(error) = this.rejection.get() {
            *this.failed = true;
            return Poll::Ready(Some(Err(AxumError::new(error))));
        }

        let frame = ready!(this.inner.poll_frame(cx));

        // Producing this frame may have read the request past its limit.
        if let Some(error) = this.rejection.get() {
            *this.failed = true;
            return Poll::Ready(Some(Err(AxumError::new(error))));
        }

        match frame {
            Some(Ok(frame)) => Poll::Ready(Some(Ok(frame))),
            Some(Err(e)) => Poll::Ready(Some(Err(AxumError::new(e)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.failed || (self.rejection.get().is_none() && self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
