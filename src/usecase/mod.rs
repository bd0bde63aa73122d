pub mod classify;
pub mod fetch;
pub mod refresh;
