use std::sync::Arc;

use crate::{config::Config, manager::FlowStateManager};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub flows: Arc<FlowStateManager>,
}
