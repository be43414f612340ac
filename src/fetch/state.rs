//! Usage: UI state reduction and stateless text rendering.

use crate::fetch::classify::EndpointOutcome;

/// Outcome of one endpoint within a cycle, tagged with what the UI needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReport {
    pub name: String,
    pub signals_elevated: bool,
    pub outcome: EndpointOutcome,
}

/// Derived purely from the most recent cycle's reports; no history retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub current_user_name: Option<String>,
    pub has_elevated_access: bool,
    pub last_error: Option<String>,
}

impl UiState {
    /// Logout target: every field cleared, regardless of prior state.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn token_acquisition_failed(user_name: &str) -> Self {
        Self {
            current_user_name: Some(user_name.to_string()),
            has_elevated_access: false,
            last_error: Some("Unable to obtain an access token.".to_string()),
        }
    }
}

/// Reduce one cycle's reports to UI state. Deterministic tie-break: reports
/// arrive in endpoint declaration order and the last failure wins, so the
/// result does not depend on network completion order.
pub fn reduce(user_name: &str, reports: &[EndpointReport]) -> UiState {
    let mut state = UiState {
        current_user_name: Some(user_name.to_string()),
        has_elevated_access: false,
        last_error: None,
    };
    for report in reports {
        match &report.outcome {
            EndpointOutcome::Success(_) => {
                if report.signals_elevated {
                    state.has_elevated_access = true;
                }
            }
            EndpointOutcome::Empty => {}
            EndpointOutcome::Failure(message) => {
                state.last_error = Some(message.clone());
            }
        }
    }
    state
}

/// Stateless render: lines of text derived from the state, nothing else.
pub fn render(state: &UiState) -> Vec<String> {
    let mut lines = Vec::new();
    match state.current_user_name.as_deref() {
        Some(name) => lines.push(format!("Usuário {name} logged in successfully!")),
        None => lines.push(
            "You are not logged in. Please use the login command to continue.".to_string(),
        ),
    }
    if state.has_elevated_access {
        lines.push("You have Administrator permissions.".to_string());
    }
    if let Some(error) = state.last_error.as_deref() {
        lines.push(format!("An error occurred: {error}"));
    }
    lines
}
