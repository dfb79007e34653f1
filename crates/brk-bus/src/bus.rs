//! [`Bus`]: the generic command/query/event router.
//!
//! A typed registry keyed by [`TypeId`], open to any `Command`/`Query`/
//! `Event` type registered at startup instead of one closed enum.

use crate::envelope::Envelope;
use crate::message::{Command, CommandHandler, Event, EventHandler, Query, QueryHandler};
use brk_domain::{BrokerError, BrokerResult};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

type AnyHandler = Box<dyn Any + Send + Sync>;

struct CacheEntry {
    value: Box<dyn Any + Send + Sync>,
    tag: Option<&'static str>,
    expires_at: Instant,
}

/// The command/query/event router. Registration is explicit (called from
/// the composition root at startup) rather than scanned via reflection,
/// since Rust has no runtime annotation discovery; this is the same
/// "bind once at startup, resolve through the container after" shape the
/// spec's DI-container wiring describes.
#[derive(Default)]
pub struct Bus {
    commands: RwLock<HashMap<TypeId, (AnyHandler, &'static [&'static str])>>,
    queries: RwLock<HashMap<TypeId, AnyHandler>>,
    events: RwLock<HashMap<TypeId, Vec<AnyHandler>>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by type: registering again replaces the prior binding.
    pub fn register_command_handler<C, H>(&self, handler: H)
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let tags = handler.invalidation_tags();
        let boxed: AnyHandler = Box::new(std::sync::Arc::new(handler) as std::sync::Arc<dyn CommandHandler<C>>);
        self.commands.write().insert(TypeId::of::<C>(), (boxed, tags));
    }

    pub fn register_query_handler<Q, H>(&self, handler: H)
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let boxed: AnyHandler = Box::new(std::sync::Arc::new(handler) as std::sync::Arc<dyn QueryHandler<Q>>);
        self.queries.write().insert(TypeId::of::<Q>(), boxed);
    }

    pub fn register_event_handler<E, H>(&self, handler: H)
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let boxed: AnyHandler = Box::new(std::sync::Arc::new(handler) as std::sync::Arc<dyn EventHandler<E>>);
        self.events
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(boxed);
    }

    pub fn dispatch<C: Command>(&self, command: C) -> impl std::future::Future<Output = Envelope<C::Output>> + '_ {
        let handler_and_tags = self
            .commands
            .read()
            .get(&TypeId::of::<C>())
            .map(|(boxed, tags)| {
                (
                    boxed
                        .downcast_ref::<std::sync::Arc<dyn CommandHandler<C>>>()
                        .expect("command handler registry type mismatch")
                        .clone(),
                    *tags,
                )
            });

        async move {
            let Some((handler, tags)) = handler_and_tags else {
                return Envelope::from_error(BrokerError::NotFound(
                    "no command handler registered for this type".to_string(),
                ));
            };
            let result = handler.handle(command).await;
            if result.is_ok() {
                self.invalidate_tags(tags);
            }
            Envelope::from_result(result)
        }
    }

    pub fn ask<Q: Query>(&self, query: Q) -> impl std::future::Future<Output = Envelope<Q::Output>> + '_ {
        let handler = self
            .queries
            .read()
            .get(&TypeId::of::<Q>())
            .map(|boxed| {
                boxed
                    .downcast_ref::<std::sync::Arc<dyn QueryHandler<Q>>>()
                    .expect("query handler registry type mismatch")
                    .clone()
            });

        async move {
            let Some(handler) = handler else {
                return Envelope::from_error(BrokerError::NotFound(
                    "no query handler registered for this type".to_string(),
                ));
            };

            let cache_key = query.cache_key().filter(|_| handler.cache_ttl().is_some());
            if let Some(key) = &cache_key
                && let Some(hit) = self.cache_lookup::<Q::Output>(key)
            {
                debug!(cache_key = %key, "query cache hit");
                return Envelope::ok(hit);
            }

            let result = handler.handle(&query).await;
            if let (Ok(value), Some(key)) = (&result, &cache_key) {
                self.cache_store(key.clone(), value.clone(), handler.cache_tag(), handler.cache_ttl().unwrap());
            }
            Envelope::from_result(result)
        }
    }

    pub fn publish<E: Event>(&self, event: E) -> impl std::future::Future<Output = ()> + '_ {
        let handlers: Vec<std::sync::Arc<dyn EventHandler<E>>> = self
            .events
            .read()
            .get(&TypeId::of::<E>())
            .map(|boxed_vec| {
                boxed_vec
                    .iter()
                    .map(|boxed| {
                        boxed
                            .downcast_ref::<std::sync::Arc<dyn EventHandler<E>>>()
                            .expect("event handler registry type mismatch")
                            .clone()
                    })
                    .collect()
            })
            .unwrap_or_default();

        async move {
            for handler in handlers {
                handler.handle(&event).await;
            }
        }
    }

    fn cache_lookup<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    fn cache_store<T: Send + Sync + 'static>(&self, key: String, value: T, tag: Option<&'static str>, ttl: Duration) {
        self.cache.write().insert(
            key,
            CacheEntry {
                value: Box::new(value),
                tag,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn invalidate_tags(&self, tags: &'static [&'static str]) {
        if tags.is_empty() {
            return;
        }
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, entry| !entry.tag.is_some_and(|t| tags.contains(&t)));
        if cache.len() != before {
            debug!(evicted = before - cache.len(), "invalidated cached query results");
        }
    }
}
