//! Policy Engine: the single scripting VM shared by both bridges.

pub mod engine;

pub use engine::PolicyEngine;
