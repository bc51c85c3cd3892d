//! Default build encoding: JSON of the allocation snapshot

use crate::core::AllocationState;
use crate::error::OptimizerResult;
use crate::traits::AllocationEncoder;

/// Encodes allocations as JSON `AllocationSnapshot`s
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAllocationEncoder;

impl AllocationEncoder for JsonAllocationEncoder {
    fn encode(&self, state: &AllocationState) -> OptimizerResult<Vec<u8>> {
        Ok(state.snapshot().to_json_bytes()?)
    }
}
