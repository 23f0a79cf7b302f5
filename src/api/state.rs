use std::sync::Arc;

use crate::history::JobHistory;
use crate::scheduler::JobWrapperChain;

#[derive(Clone)]
pub struct AppState {
    pub history: Arc<dyn JobHistory>,
    pub chain: JobWrapperChain,
}
