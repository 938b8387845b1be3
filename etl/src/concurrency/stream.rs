use core::pin::Pin;
use core::task::{Context, Poll};

use futures::{Stream, ready};
use pin_project_lite::pin_project;

pin_project! {
    /// A stream adapter that groups the `Ok` items of a fallible stream into batches.
    ///
    /// A batch is emitted once it holds `max_size` items or when the inner stream ends with a
    /// partial batch. The first error is emitted as soon as it is seen, dropping the partial
    /// batch, and ends the stream.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<T, E, S: Stream<Item = Result<T, E>>> {
        #[pin]
        stream: S,
        items: Vec<T>,
        max_size: usize,
        ended: bool,
    }
}

impl<T, E, S: Stream<Item = Result<T, E>>> BatchStream<T, E, S> {
    /// Creates a new [`BatchStream`] emitting batches of at most `max_size` items.
    ///
    /// A `max_size` of zero is treated as one.
    pub fn wrap(stream: S, max_size: usize) -> Self {
        let max_size = max_size.max(1);

        BatchStream {
            stream,
            items: Vec::with_capacity(max_size),
            max_size,
            ended: false,
        }
    }
}

impl<T, E, S: Stream<Item = Result<T, E>>> Stream for BatchStream<T, E, S> {
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.ended {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(item)) => {
                    this.items.push(item);

                    if this.items.len() >= *this.max_size {
                        let batch =
                            std::mem::replace(this.items, Vec::with_capacity(*this.max_size));
                        return Poll::Ready(Some(Ok(batch)));
                    }
                }
                Some(Err(err)) => {
                    *this.ended = true;
                    this.items.clear();

                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    *this.ended = true;

                    if this.items.is_empty() {
                        return Poll::Ready(None);
                    }

                    return Poll::Ready(Some(Ok(std::mem::take(this.items))));
                }
            }
        }
    }
}
