pub mod util;
pub mod alignment;
pub mod solvent_accessibility;
pub mod mismatch;
pub mod eplets;
pub mod ranking;
