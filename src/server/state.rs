use crate::pipeline::RembgPipeline;

/// Shared state handed to every handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: RembgPipeline,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: RembgPipeline) -> Self {
        Self { pipeline }
    }
}
