use raidsync_core::config::NotifyConfig;

/// Caps applied to every new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_connections: usize,
    pub max_per_client: usize,
}

impl From<&NotifyConfig> for Limits {
    fn from(cfg: &NotifyConfig) -> Self {
        Self {
            max_connections: cfg.max_connections,
            max_per_client: cfg.max_per_client,
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved for the caller; it must be activated or cancelled.
    Admitted,
    RejectedGlobalCap,
    RejectedPerClientCap,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Text of the single `error` event sent to a rejected subscriber.
    pub fn rejection_message(&self, limits: &Limits) -> Option<String> {
        match self {
            Admission::Admitted => None,
            Admission::RejectedGlobalCap => Some(format!(
                "server connection limit reached ({} connections)",
                limits.max_connections
            )),
            Admission::RejectedPerClientCap => Some(format!(
                "too many connections from this client (limit {})",
                limits.max_per_client
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_exceeded_limit() {
        let limits = Limits {
            max_connections: 50,
            max_per_client: 5,
        };
        assert_eq!(Admission::Admitted.rejection_message(&limits), None);
        assert!(Admission::RejectedGlobalCap
            .rejection_message(&limits)
            .unwrap()
            .contains("50"));
        assert!(Admission::RejectedPerClientCap
            .rejection_message(&limits)
            .unwrap()
            .contains("limit 5"));
    }

    #[test]
    fn limits_follow_config() {
        let cfg = NotifyConfig {
            max_connections: 7,
            max_per_client: 2,
            ..NotifyConfig::default()
        };
        assert_eq!(
            Limits::from(&cfg),
            Limits {
                max_connections: 7,
                max_per_client: 2
            }
        );
    }
}
