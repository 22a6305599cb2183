use crate::config::Config;
use crate::service::InboxService;
use std::sync::Arc;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppContext {
    pub inbox: InboxService,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(inbox: InboxService, config: Arc<Config>) -> Self {
        Self { inbox, config }
    }
}
