mod gateway;
mod mode;
mod request;
mod subject;

pub use alloy_primitives::{Address, TxHash, U256};
pub use gateway::{GatewayState, GatewayStatus};
pub use mode::{Mode, ModeSelection};
pub use request::{
    Decrypted, DecryptionRequest, Failure, InvalidTransition, LifecycleState, Progress,
};
pub use subject::{CorrelationId, PlanId, SubjectId};
