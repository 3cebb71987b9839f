pub mod error;
pub mod jobs;
pub mod publish;
