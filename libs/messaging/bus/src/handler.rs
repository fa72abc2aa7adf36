//! Topic handlers for the receive loop

use crate::wire::WireMessage;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, message: WireMessage);
}

#[async_trait]
impl<F, Fut> TopicHandler for F
where
    F: Fn(WireMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: WireMessage) {
        (self)(message).await
    }
}

/// Topic prefix → handler routes. A frame runs every handler whose prefix
/// its topic starts with.
#[derive(Clone, Default)]
pub struct HandlerSet {
    routes: Vec<(String, Arc<dyn TopicHandler>)>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prefix: impl Into<String>, handler: impl TopicHandler + 'static) -> Self {
        self.routes.push((prefix.into(), Arc::new(handler)));
        self
    }

    pub fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<dyn TopicHandler>> {
        self.routes
            .iter()
            .filter(move |(prefix, _)| topic.starts_with(prefix.as_str()))
            .map(|(_, handler)| handler)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(prefix, _)| prefix.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.prefixes()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_: WireMessage) {}

    #[test]
    fn test_prefix_matching() {
        let handlers = HandlerSet::new()
            .on("metric-", noop)
            .on("metric-/free", noop)
            .on("peers-heartbeat", noop);

        assert_eq!(handlers.matching("metric-/free.Swap.Free").count(), 2);
        assert_eq!(handlers.matching("metric-/uptime").count(), 1);
        assert_eq!(handlers.matching("peers-heartbeat").count(), 1);
        assert_eq!(handlers.matching("checks-refetch").count(), 0);
    }
}
