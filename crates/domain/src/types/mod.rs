//! Domain types and models

pub mod credentials;
pub mod failure;
pub mod publish;

pub use credentials::Credentials;
pub use failure::{FailureCode, PublishFailure};
pub use publish::{PublishContent, PublishJob, PublishReceipt, PublishStatus};
