pub mod extraction;
pub mod batch;
pub mod delivery;
