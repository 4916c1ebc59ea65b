//! Mock implementations of the pluggable connector and policy engine
//! contracts, for composing the rest of the workspace in tests without a
//! real ledger. `txm-persistence::memory::MemoryPersistence` already serves
//! as the reference persistence mock and isn't duplicated here.

pub mod confirmation;
pub mod connector;
pub mod policy;
