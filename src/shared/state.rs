use std::sync::Arc;

use crate::notifications::NotificationDispatcher;
use crate::security::permissions::PermissionRegistry;
use crate::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    pub permissions: Arc<PermissionRegistry>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            permissions: Arc::clone(&self.permissions),
            notifier: Arc::clone(&self.notifier),
        }
    }
}
