pub mod audit;
pub mod batch;
pub mod consent;
pub mod hook;
pub mod policy;
pub mod stage;
