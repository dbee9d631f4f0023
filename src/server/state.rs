use std::sync::Arc;

use crate::notify::NotificationHandler;
use crate::orchestrator::TranslationOrchestrator;

pub(crate) struct ServerState {
    pub(crate) orchestrator: Arc<TranslationOrchestrator>,
    pub(crate) notifications: NotificationHandler,
}
