/**
 * MESSAGE REGISTRY - Tag → handler dispatch table
 *
 * ROLE : Splits an inbound payload on '|', looks up field 0 and runs the
 * matching handler over the remaining fields.
 *
 * The standard table is an explicit literal built once and injected into the
 * coordinator. Tests extend or shrink it with `register` / `unregister`.
 */

use crate::handlers;
use crate::store::StoreUpdate;
use std::collections::HashMap;

pub use crate::handlers::HandlerError;

pub type Handler = fn(&[&str]) -> Result<StoreUpdate, HandlerError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("empty message")]
    Empty,

    #[error("unknown message type: {0}")]
    UnknownTag(String),

    #[error("malformed {tag} message: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: HandlerError,
    },
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("tags", &self.tags()).finish()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every tag the controller is known to send.
    pub fn standard() -> Self {
        let table: [(&str, Handler); 9] = [
            ("CLEAR", handlers::clear),
            ("CONFIG", handlers::config),
            ("STATUS", handlers::status),
            ("REPS_ADD", handlers::reps_add),
            ("SCHEMA_ADD", handlers::schema_add),
            ("PROBE_ADD", handlers::probe_add),
            ("TSADV", handlers::tsadv),
            ("LOG", handlers::log),
            ("HEARTBEAT", handlers::heartbeat),
        ];
        Self {
            handlers: table
                .into_iter()
                .map(|(tag, handler)| (tag.to_string(), handler))
                .collect(),
        }
    }

    /// Returns the handler previously bound to `tag`, if any.
    pub fn register(&mut self, tag: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.handlers.insert(tag.into(), handler)
    }

    pub fn unregister(&mut self, tag: &str) -> Option<Handler> {
        self.handlers.remove(tag)
    }

    pub fn get(&self, tag: &str) -> Option<Handler> {
        self.handlers.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Sorted, for stable display.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn dispatch(&self, message: &str) -> Result<StoreUpdate, DispatchError> {
        let message = message.trim_end_matches(['\r', '\n']);
        if message.is_empty() {
            return Err(DispatchError::Empty);
        }

        let fields: Vec<&str> = message.split('|').collect();
        let tag = fields[0];
        let handler = self
            .get(tag)
            .ok_or_else(|| DispatchError::UnknownTag(tag.to_string()))?;

        handler(&fields[1..]).map_err(|source| DispatchError::Malformed {
            tag: tag.to_string(),
            source,
        })
    }
}
