use serde::{Deserialize, Serialize};

/// Coarse lifecycle state shared by every request kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Being configured; `execute` has not been called.
    #[default]
    Built,
    /// In flight.
    Executing,
    /// Completed through the success callback.
    Succeeded,
    /// Completed through the error callback.
    Failed,
    /// Cancelled by the caller or by an enclosing compound.
    Cancelled,
}

impl RequestState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
        )
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Built => "built",
            RequestState::Executing => "executing",
            RequestState::Succeeded => "succeeded",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Snapshot of a registered request, as listed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestStatus {
    pub tag: String,
    pub group: String,
    pub state: RequestState,
}

impl RequestStatus {
    pub fn is_executing(&self) -> bool {
        self.state == RequestState::Executing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!RequestState::Built.is_terminal());
        assert!(!RequestState::Executing.is_terminal());
        assert!(RequestState::Succeeded.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&RequestState::Cancelled).unwrap();
        assert_eq!(json, r#""cancelled""#);
    }

    #[test]
    fn status_is_executing() {
        let status = RequestStatus {
            tag: "t".to_string(),
            group: "g".to_string(),
            state: RequestState::Executing,
        };
        assert!(status.is_executing());
        assert_eq!(status.state.to_string(), "executing");
    }
}
