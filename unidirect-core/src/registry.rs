//! Effect registry: live effect ids and their cancellation handles
//!
//! Provides lifecycle management for launched effects:
//! - Effects that finish synchronously are never registered
//! - Effects still running are stored under their id until they complete
//! - Cancellation by id, where unknown ids are a no-op
//!
//! The registry only ever runs on the runtime's context. Effect tasks report
//! completion through the inbox and the runtime calls [`EffectRegistry::complete`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::effect::{Effect, EffectId, EffectManager};
use crate::error::RuntimeError;
use crate::task::{poll_ready, spawn_forwarder, Inbox, ReadySink, Source, TaskHandle};

/// Tracks running effects by id.
///
/// # Type Parameters
///
/// - `A`: The action type that effects produce
pub struct EffectRegistry<A> {
    handles: HashMap<EffectId, TaskHandle>,
    inbox: Inbox<A>,
}

impl<A> EffectRegistry<A>
where
    A: Send + 'static,
{
    pub(crate) fn new(inbox: Inbox<A>) -> Self {
        Self {
            handles: HashMap::new(),
            inbox,
        }
    }

    /// Launch an effect.
    ///
    /// Actions the effect produces synchronously are pushed to `ready`. If
    /// the effect completes before this returns, nothing is registered.
    /// Otherwise the rest of its stream runs on a tokio task and the handle is
    /// stored under the effect's id.
    pub(crate) fn launch<Env>(
        &mut self,
        effect: Effect<A, Env>,
        env: Arc<Env>,
        ready: &mut impl ReadySink<A>,
    ) {
        let id = effect.id();
        let stream = effect.run(self, env);

        let Some(rest) = poll_ready(stream, ready) else {
            tracing::trace!(effect = %id, "Effect completed synchronously");
            return;
        };

        if let Some(previous) = self.handles.remove(&id) {
            let err = RuntimeError::DuplicateEffect(id);
            tracing::error!(error = %err, "Effect id registered twice");
            debug_assert!(false, "{err}");
            previous.cancel();
        }

        let handle = spawn_forwarder(
            Source::Effect(id),
            rest,
            CancellationToken::new(),
            self.inbox.clone(),
        );
        self.handles.insert(id, handle);
        tracing::trace!(effect = %id, running = self.handles.len(), "Effect launched");
    }

    /// Drop the entry of an effect whose task finished on its own.
    pub(crate) fn complete(&mut self, id: EffectId) {
        if self.handles.remove(&id).is_some() {
            tracing::trace!(effect = %id, "Effect completed");
        }
    }

    /// Cancel an effect by id.
    ///
    /// If no effect is registered under `id` (never launched, completed, or
    /// already cancelled), this is a no-op.
    pub fn cancel(&mut self, id: EffectId) {
        if let Some(handle) = self.handles.remove(&id) {
            handle.cancel();
            tracing::trace!(effect = %id, "Effect cancelled");
        }
    }

    /// Cancel all running effects.
    ///
    /// Used on shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
    }

    /// Check if an effect with the given id is currently running.
    pub fn is_running(&self, id: EffectId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Get the number of running effects.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if there are no running effects.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Get the ids of all running effects.
    pub fn running_ids(&self) -> impl Iterator<Item = &EffectId> {
        self.handles.keys()
    }
}

impl<A> EffectManager for EffectRegistry<A>
where
    A: Send + 'static,
{
    fn cancel_effect(&mut self, id: EffectId) {
        self.cancel(id);
    }
}

impl<A> Drop for EffectRegistry<A> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Message;
    use futures::stream::{self, StreamExt};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Env;

    fn registry() -> (EffectRegistry<u32>, mpsc::UnboundedReceiver<Message<u32>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EffectRegistry::new(tx), rx)
    }

    #[tokio::test]
    async fn test_synchronous_effect_is_never_registered() {
        let (mut registry, _rx) = registry();
        let mut ready = VecDeque::new();

        let effect: Effect<u32, Env> = Effect::from_actions(vec![1, 2]);
        let id = effect.id();
        registry.launch(effect, Arc::new(Env), &mut ready);

        assert_eq!(ready, VecDeque::from(vec![1, 2]));
        assert!(!registry.is_running(id));
        assert!(registry.is_empty());

        // Cancelling a completed effect is a no-op
        registry.cancel(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_pending_effect_registered_until_completion() {
        let (mut registry, mut rx) = registry();
        let mut ready = VecDeque::new();

        let effect: Effect<u32, Env> = Effect::future(|_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        });
        let id = effect.id();
        registry.launch(effect, Arc::new(Env), &mut ready);

        assert!(ready.is_empty());
        assert!(registry.is_running(id));
        assert_eq!(registry.running_ids().collect::<Vec<_>>(), vec![&id]);

        let msg = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(msg, Message::Emit { action: 42, .. }));

        let msg = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(msg, Message::Completed(c) if c == id));

        registry.complete(id);
        assert!(!registry.is_running(id));
    }

    #[tokio::test]
    async fn test_cancel_removes_and_silences() {
        let (mut registry, mut rx) = registry();
        let mut ready = VecDeque::new();

        let effect: Effect<u32, Env> = Effect::delayed(Duration::from_millis(20), |_| async { 1 });
        let id = effect.id();
        registry.launch(effect, Arc::new(Env), &mut ready);
        assert!(registry.is_running(id));

        registry.cancel(id);
        assert!(!registry.is_running(id));

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "cancelled effect must not produce output");
    }

    #[tokio::test]
    async fn test_cancel_effect_targets_running_effect() {
        let (mut registry, _rx) = registry();
        let mut ready = VecDeque::new();

        let long: Effect<u32, Env> = Effect::stream(|_| stream::pending());
        let long_id = long.id();
        registry.launch(long, Arc::new(Env), &mut ready);
        assert_eq!(registry.len(), 1);

        let cancel: Effect<u32, Env> = Effect::cancel(long_id);
        registry.launch(cancel, Arc::new(Env), &mut ready);

        assert!(registry.is_empty());
        assert!(ready.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (mut registry, _rx) = registry();
        let mut ready = VecDeque::new();

        for _ in 0..3 {
            let effect: Effect<u32, Env> = Effect::stream(|_| stream::pending().boxed());
            registry.launch(effect, Arc::new(Env), &mut ready);
        }
        assert_eq!(registry.len(), 3);

        registry.cancel_all();
        assert!(registry.is_empty());
    }
}
