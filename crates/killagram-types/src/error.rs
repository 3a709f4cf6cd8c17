use thiserror::Error;

/// Typed failures raised by the core. The transport layer maps each variant
/// to a status code and the machine-readable code from [`CoreError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Invalid, expired or revoked token, or a missing credential. Carries
    /// no detail on purpose.
    #[error("unauthorized")]
    AuthFailure,

    #[error("{0:?} not found")]
    NotFound(NotFound),

    #[error("policy violation: {0:?}")]
    Policy(PolicyViolation),

    #[error("rate limited: {0:?}")]
    RateLimited(RateLimit),

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    Folder,
    Message,
    Gift,
    Item,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    PremiumRequired,
    PremiumMarketRequired,
    EditWindowExpired,
    DeleteWindowExpired,
    SystemFolderImmutable,
    InsufficientStars,
    InvalidFilterCombination,
    PasswordRequired,
    AccountFrozen { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    Api,
    AiSummary,
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthFailure => "UNAUTHORIZED",
            Self::NotFound(NotFound::Folder) => "FOLDER_NOT_FOUND",
            Self::NotFound(NotFound::Message) => "MESSAGE_NOT_FOUND",
            Self::NotFound(NotFound::Gift) => "GIFT_NOT_FOUND",
            Self::NotFound(NotFound::Item) => "ITEM_NOT_FOUND",
            Self::Policy(policy) => policy.code(),
            Self::RateLimited(RateLimit::Api) => "RATE_LIMIT_EXCEEDED",
            Self::RateLimited(RateLimit::AiSummary) => "AI_SUMMARY_RATE_LIMIT",
            Self::Provider(_) => "PROVIDER_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl PolicyViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PremiumRequired => "PREMIUM_REQUIRED",
            Self::PremiumMarketRequired => "PREMIUM_MARKET_REQUIRED",
            Self::EditWindowExpired => "EDIT_WINDOW_EXPIRED",
            Self::DeleteWindowExpired => "DELETE_WINDOW_EXPIRED",
            Self::SystemFolderImmutable => "SYSTEM_FOLDER_IMMUTABLE",
            Self::InsufficientStars => "INSUFFICIENT_STARS",
            Self::InvalidFilterCombination => "INVALID_FILTER_COMBINATION",
            Self::PasswordRequired => "PASSWORD_REQUIRED",
            Self::AccountFrozen { .. } => "ACCOUNT_FROZEN",
        }
    }
}

impl From<NotFound> for CoreError {
    fn from(kind: NotFound) -> Self {
        Self::NotFound(kind)
    }
}

impl From<PolicyViolation> for CoreError {
    fn from(policy: PolicyViolation) -> Self {
        Self::Policy(policy)
    }
}

impl From<RateLimit> for CoreError {
    fn from(limit: RateLimit) -> Self {
        Self::RateLimited(limit)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_category() {
        assert_eq!(CoreError::from(NotFound::Folder).code(), "FOLDER_NOT_FOUND");
        assert_eq!(
            CoreError::from(PolicyViolation::AccountFrozen { reason: None }).code(),
            "ACCOUNT_FROZEN"
        );
        assert_ne!(
            CoreError::from(RateLimit::AiSummary).code(),
            CoreError::from(PolicyViolation::PremiumRequired).code()
        );
    }
}
