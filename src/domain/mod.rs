pub mod review;
pub mod stats;
