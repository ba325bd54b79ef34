use log::{info, warn};

/// Logger carrying the unit of work (session, channel) it reports for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogManager {
    scope: Option<String>,
}

impl LogManager {
    pub fn new() -> Self {
        Self { scope: None }
    }

    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
        }
    }

    /// Nested logger, e.g. `20210616nt/532AN`.
    pub fn scope(&self, child: &str) -> Self {
        match &self.scope {
            Some(parent) => Self::scoped(format!("{}/{}", parent, child)),
            None => Self::scoped(child),
        }
    }

    pub fn record(&self, message: &str) {
        match &self.scope {
            Some(scope) => info!("[{}] {}", scope, message),
            None => info!("{}", message),
        }
    }

    pub fn warn(&self, message: &str) {
        match &self.scope {
            Some(scope) => warn!("[{}] {}", scope, message),
            None => warn!("{}", message),
        }
    }
}
