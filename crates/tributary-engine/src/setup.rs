//! Guided setup state machine.
//!
//! Onboarding is a sequence of small fixed-shape steps: each step
//! either prompts for one input and names the [`StateTransition`] that
//! input feeds, or declares the flow complete with an output message.
//! Transitions are a closed enum dispatched by pattern match, so only
//! the recognized fields can ever be mutated by user input.

use serde::{Deserialize, Serialize};

use tributary_core::integration::ServiceIntegration;

/// The recognized integration-field transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTransition {
    /// Set the webhook signing secret.
    WebhookSecret,
    /// Set the backfill API key.
    BackfillKey,
    /// Set the backfill API secret.
    BackfillSecret,
    /// Set the base API URL.
    ApiUrl,
    /// Set the dependency link to another integration's opaque id.
    DependencyChoice,
    /// Accept the input without mutating anything.
    Noop,
}

impl StateTransition {
    /// Applies one user input to the integration.
    pub fn apply(self, integration: &mut ServiceIntegration, value: &str) {
        let value = value.trim();
        let field = match self {
            Self::WebhookSecret => &mut integration.webhook_secret,
            Self::BackfillKey => &mut integration.backfill_key,
            Self::BackfillSecret => &mut integration.backfill_secret,
            Self::ApiUrl => &mut integration.api_url,
            Self::DependencyChoice => &mut integration.depends_on,
            Self::Noop => return,
        };
        *field = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }
}

/// One step of the guided setup flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupStep {
    /// Whether the step needs user input.
    pub needs_input: bool,
    /// Prompt shown when input is needed.
    pub prompt: Option<String>,
    /// Whether the prompted input is a secret (masked in UIs).
    pub prompt_is_secret: bool,
    /// The transition the input feeds.
    pub transition: Option<StateTransition>,
    /// URL the collected input should be submitted to, for HTTP hosts.
    pub post_to_url: Option<String>,
    /// Whether the flow is complete.
    pub complete: bool,
    /// Message shown on completion or alongside a prompt.
    pub output: String,
    /// Machine-readable code identifying why the flow cannot proceed.
    pub error_code: Option<String>,
}

impl SetupStep {
    /// A step prompting for one input.
    #[must_use]
    pub fn prompting(
        prompt: impl Into<String>,
        secret: bool,
        transition: StateTransition,
        output: impl Into<String>,
    ) -> Self {
        Self {
            needs_input: true,
            prompt: Some(prompt.into()),
            prompt_is_secret: secret,
            transition: Some(transition),
            post_to_url: None,
            complete: false,
            output: output.into(),
            error_code: None,
        }
    }

    /// A terminal step.
    #[must_use]
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            needs_input: false,
            prompt: None,
            prompt_is_secret: false,
            transition: None,
            post_to_url: None,
            complete: true,
            output: output.into(),
            error_code: None,
        }
    }

    /// A terminal step describing why the flow cannot proceed.
    #[must_use]
    pub fn errored(code: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            ..Self::completed(output)
        }
    }

    /// Sets the URL an HTTP host should submit the input to.
    #[must_use]
    pub fn with_post_to_url(mut self, url: impl Into<String>) -> Self {
        self.post_to_url = Some(url.into());
        self
    }

    /// The default flow shared by most adapters: collect the webhook
    /// secret, then the backfill key and secret, then finish.
    #[must_use]
    pub fn default_flow(service_name: &str, integration: &ServiceIntegration) -> Self {
        if integration.webhook_secret.is_none() {
            return Self::prompting(
                format!("Paste the {service_name} webhook signing secret:"),
                true,
                StateTransition::WebhookSecret,
                format!("{service_name} will verify webhook deliveries with this secret."),
            );
        }
        if integration.backfill_key.is_none() {
            return Self::prompting(
                format!("Paste the {service_name} API key:"),
                true,
                StateTransition::BackfillKey,
                "The API key is used to backfill historical rows.",
            );
        }
        if integration.backfill_secret.is_none() {
            return Self::prompting(
                format!("Paste the {service_name} API secret:"),
                true,
                StateTransition::BackfillSecret,
                "The API secret is used to backfill historical rows.",
            );
        }
        Self::completed(format!(
            "{service_name} is set up; rows will appear in {} as they sync.",
            integration.table_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sint() -> ServiceIntegration {
        ServiceIntegration::new("svi_x1", "acme_widget_v1", "org_1", "acme_widget_v1_x1")
    }

    #[test]
    fn test_transition_sets_fields() {
        let mut integration = sint();
        StateTransition::WebhookSecret.apply(&mut integration, "whsec_123");
        StateTransition::ApiUrl.apply(&mut integration, " https://api.example.com ");
        assert_eq!(integration.webhook_secret.as_deref(), Some("whsec_123"));
        assert_eq!(integration.api_url.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn test_empty_input_clears_field() {
        let mut integration = sint();
        integration.backfill_key = Some("old".into());
        StateTransition::BackfillKey.apply(&mut integration, "");
        assert!(integration.backfill_key.is_none());
    }

    #[test]
    fn test_noop_mutates_nothing() {
        let mut integration = sint();
        StateTransition::Noop.apply(&mut integration, "anything");
        assert!(integration.webhook_secret.is_none());
        assert!(integration.depends_on.is_none());
    }

    #[test]
    fn test_errored_step_is_terminal_with_code() {
        let step = SetupStep::errored("missing_dependency", "Create the parent integration first.");
        assert!(step.complete);
        assert!(!step.needs_input);
        assert_eq!(step.error_code.as_deref(), Some("missing_dependency"));
    }

    #[test]
    fn test_default_flow_walks_credentials() {
        let mut integration = sint();

        let step = SetupStep::default_flow("acme_widget_v1", &integration);
        assert!(step.needs_input);
        assert_eq!(step.transition, Some(StateTransition::WebhookSecret));

        integration.webhook_secret = Some("s".into());
        let step = SetupStep::default_flow("acme_widget_v1", &integration);
        assert_eq!(step.transition, Some(StateTransition::BackfillKey));

        integration.backfill_key = Some("k".into());
        integration.backfill_secret = Some("sec".into());
        let step = SetupStep::default_flow("acme_widget_v1", &integration);
        assert!(step.complete);
        assert!(step.output.contains("acme_widget_v1_x1"));
    }
}
