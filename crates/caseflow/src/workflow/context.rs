use crate::services::{CallContext, Credential};
use crate::tracker::types::RunId;

/// Identity of one coordinator run, shared by all its document workflows.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub case_id: String,
    pub correlation_id: String,
    pub credential: Credential,
    pub run_id: RunId,
}

impl RunContext {
    pub fn call_context(&self) -> CallContext {
        CallContext {
            correlation_id: self.correlation_id.clone(),
            credential: self.credential.clone(),
        }
    }
}
