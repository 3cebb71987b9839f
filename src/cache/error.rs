use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The object alone is larger than the cache may ever hold.
    #[error("object of cost {cost} rejected: cache limit is {limit}")]
    Rejected { cost: usize, limit: usize },
    #[error("cache entry is not completed")]
    Incomplete,
    /// Writing to the output sink failed; the cached entry itself is still valid.
    #[error("failed to deliver cached output: {0}")]
    DeliveryFailed(#[source] std::io::Error),
    #[error("include of `{target}` failed: {message}")]
    Include { target: String, message: String },
}

impl CacheError {
    pub fn rejected(cost: usize, limit: usize) -> Self {
        Self::Rejected { cost, limit }
    }

    pub fn include(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Include {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::DeliveryFailed(_))
    }
}
