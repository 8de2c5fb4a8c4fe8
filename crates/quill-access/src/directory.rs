//! Lookups into data owned by other services: who wrote a piece of content,
//! and which subscription a reader holds.
//!
//! The database implementations read tables that those services keep in
//! sync through the daemon.

use std::sync::Arc;

use quill_db::queries::{registry, subscriptions};
use quill_db::Db;
use quill_types::content::{ContentType, Subscription};
use quill_types::{Clock, ContentId, UserId};

use crate::{AccessError, Result};

pub trait SubscriptionLookup: Send + Sync {
    /// The reader's current subscription, expired or not.
    fn subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;
}

pub trait ContentDirectory: Send + Sync {
    /// The writer and category of a content item.
    fn lookup(&self, content_id: &ContentId) -> Result<Option<(UserId, ContentType)>>;
}

#[derive(Clone)]
pub struct DbSubscriptions {
    db: Db,
    clock: Arc<dyn Clock>,
}

impl DbSubscriptions {
    pub fn new(db: Db, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Mirror a subscription change from the user service.
    pub fn set(&self, user_id: &UserId, subscription: &Subscription) -> Result<()> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            subscriptions::upsert(conn, user_id, subscription, now).map_err(AccessError::from)
        })?;
        tracing::info!(
            user_id = %user_id,
            tier = %subscription.tier,
            expires_at = subscription.expires_at,
            "subscription updated"
        );
        Ok(())
    }
}

impl SubscriptionLookup for DbSubscriptions {
    fn subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        self.db
            .with_conn(|conn| subscriptions::get(conn, user_id).map_err(AccessError::from))
    }
}

#[derive(Clone)]
pub struct DbContentDirectory {
    db: Db,
    clock: Arc<dyn Clock>,
}

impl DbContentDirectory {
    pub fn new(db: Db, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Mirror content ownership from the content service.
    pub fn register(&self, content_id: &ContentId, writer_id: &UserId, content_type: ContentType) -> Result<()> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            registry::upsert(conn, content_id, writer_id, content_type, now)
                .map_err(AccessError::from)
        })?;
        tracing::info!(content_id = %content_id, writer_id = %writer_id, %content_type, "content registered");
        Ok(())
    }
}

impl ContentDirectory for DbContentDirectory {
    fn lookup(&self, content_id: &ContentId) -> Result<Option<(UserId, ContentType)>> {
        self.db
            .with_conn(|conn| registry::get(conn, content_id).map_err(AccessError::from))
    }
}
