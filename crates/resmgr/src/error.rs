use cal::CalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResMgrError {
    /// Unknown cloud account, pool, resource or event id
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },

    /// Duplicate names, mismatched event types and busy deletes
    #[error("conflict: {0}")]
    Conflict(String),

    /// Nothing can satisfy the request right now
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A cloud call failed
    #[error("{context}: {source}")]
    Operational {
        context: String,
        #[source]
        source: CalError,
    },
}

impl ResMgrError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn operational(context: impl Into<String>, source: CalError) -> Self {
        Self::Operational {
            context: context.into(),
            source,
        }
    }

    /// Like [`ResMgrError::operational`], except that a cloud side `NotFound` stays `NotFound`.
    pub fn from_cal(context: impl Into<String>, source: CalError) -> Self {
        match source {
            CalError::NotFound { kind, id } => Self::NotFound { kind, name: id },
            other => Self::operational(context, other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cal_not_found_is_preserved() {
        let err = ResMgrError::from_cal("get vdu", CalError::not_found("vdu", "v1"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "vdu `v1` not found");

        let err = ResMgrError::from_cal("get vdu", CalError::request("get_vdu", "timeout"));
        assert!(matches!(err, ResMgrError::Operational { .. }));
        assert_eq!(err.to_string(), "get vdu: get_vdu failed: timeout");
    }
}
