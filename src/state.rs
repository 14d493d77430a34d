use std::sync::Arc;

use sqlx::SqlitePool;

use crate::feed::ChangeFeed;
use crate::session::SessionIssuer;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub sessions: Arc<SessionIssuer>,
    pub feed: ChangeFeed,
}

impl AppState {
    pub fn new(db: SqlitePool, sessions: SessionIssuer, feed: ChangeFeed) -> Self {
        Self {
            db,
            sessions: Arc::new(sessions),
            feed,
        }
    }
}
