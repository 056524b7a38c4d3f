// Core modules: token codec, snapshot planning, continuation decisions, storage, errors.
pub mod clock;
pub mod decide;
pub mod error;
pub mod plan;
pub mod table;
pub mod token;
