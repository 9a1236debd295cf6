//! Plumbing shared by effects and subscriptions
//!
//! Both kinds of work produce a stream of actions. The stream is polled eagerly
//! on the runtime's context first: anything ready right away goes straight onto
//! the action queue. If the stream is still pending afterwards, the rest of it
//! is moved onto a tokio task that forwards items to the runtime inbox, tagged
//! with the source they came from.

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::effect::EffectId;

/// Identifies a running subscription instance.
///
/// Keys say whether two requests are "the same" subscription; this id says
/// which concrete start of it produced an action. A key that is stopped and
/// later requested again gets a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// Where an action produced off-context came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Source {
    Effect(EffectId),
    Subscription(SubscriptionId),
}

/// Messages delivered to the runtime's inbox.
#[derive(Debug)]
pub(crate) enum Message<A> {
    /// An outer dispatch from a [`Dispatcher`](crate::Dispatcher).
    Dispatch(A),
    /// An action produced by an effect or subscription task.
    Emit { source: Source, action: A },
    /// An effect task ran its stream to completion.
    Completed(EffectId),
}

pub(crate) type Inbox<A> = mpsc::UnboundedSender<Message<A>>;

/// Cancellation handle for a spawned forwarding task.
#[derive(Debug)]
pub(crate) struct TaskHandle {
    abort: AbortHandle,
    token: CancellationToken,
}

impl TaskHandle {
    /// Stop the task. The token flips first so code inside the stream that
    /// checks it sees the cancellation even if the abort lands late.
    pub(crate) fn cancel(self) {
        self.token.cancel();
        self.abort.abort();
    }
}

/// Destination for actions a stream yields while it is polled eagerly.
///
/// The runtime's queue implements this so that anything dispatched from the
/// run function, or from the stream itself, lands ahead of the item that
/// followed it.
pub(crate) trait ReadySink<A> {
    fn push_ready(&mut self, action: A);
}

impl<A> ReadySink<A> for VecDeque<A> {
    fn push_ready(&mut self, action: A) {
        self.push_back(action);
    }
}

/// Poll `stream` until it stops being immediately ready.
///
/// Ready items go to `ready` in order. Returns `None` if the stream finished,
/// otherwise hands the stream back so it can be moved onto a task.
pub(crate) fn poll_ready<A>(
    mut stream: BoxStream<'static, A>,
    ready: &mut impl ReadySink<A>,
) -> Option<BoxStream<'static, A>> {
    loop {
        match stream.next().now_or_never() {
            Some(Some(action)) => ready.push_ready(action),
            Some(None) => return None,
            None => return Some(stream),
        }
    }
}

/// Move the rest of `stream` onto a tokio task forwarding items to `inbox`.
///
/// Effects report completion so the registry can drop their entry;
/// subscriptions never do.
pub(crate) fn spawn_forwarder<A>(
    source: Source,
    mut stream: BoxStream<'static, A>,
    token: CancellationToken,
    inbox: Inbox<A>,
) -> TaskHandle
where
    A: Send + 'static,
{
    let task_token = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => return,
                next = stream.next() => match next {
                    Some(action) => {
                        if task_token.is_cancelled() {
                            return;
                        }
                        if inbox.send(Message::Emit { source, action }).is_err() {
                            // Runtime gone, nothing left to deliver to
                            return;
                        }
                    }
                    None => break,
                },
            }
        }

        if let Source::Effect(id) = source {
            let _ = inbox.send(Message::Completed(id));
        }
    });

    TaskHandle {
        abort: handle.abort_handle(),
        token,
    }
}
