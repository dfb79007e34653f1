//! The `Command` / `Query` / `Event` marker traits and their handler
//! traits (spec §4.4).

use async_trait::async_trait;
use brk_domain::BrokerResult;

/// A message that mutates state. Exactly one handler serves a given
/// `Command` type.
pub trait Command: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
}

/// A message that reads state without mutating it. Exactly one handler
/// serves a given `Query` type; its result may be cached.
pub trait Query: Send + Sync + 'static {
    type Output: Send + Sync + Clone + 'static;

    /// A pure function of the query producing a cache key. Returning
    /// `None` disables caching for this particular query value.
    fn cache_key(&self) -> Option<String> {
        None
    }
}

/// A fact that already happened. Any number of handlers may observe a
/// given `Event` type.
pub trait Event: Send + Sync + Clone + 'static {}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C) -> BrokerResult<C::Output>;

    /// Cache-invalidation tags this command's success invalidates. Any
    /// cached query result registered under one of these tags is evicted
    /// after a successful `handle`.
    fn invalidation_tags(&self) -> &'static [&'static str] {
        &[]
    }
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: &Q) -> BrokerResult<Q::Output>;

    /// `None` disables caching regardless of whether the query itself
    /// declares a cache key.
    fn cache_ttl(&self) -> Option<std::time::Duration> {
        None
    }

    /// The invalidation tag this handler's cached results are filed
    /// under; must match a [`CommandHandler::invalidation_tags`] entry
    /// to be invalidated by that command.
    fn cache_tag(&self) -> Option<&'static str> {
        None
    }
}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: &E);
}
