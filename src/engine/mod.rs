pub mod alarm;
pub mod alerts;
pub mod evaluator;
pub mod notify;
pub mod session;
pub mod tick;
