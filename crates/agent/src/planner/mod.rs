//! Planner: asks the model for one step of code and validates it.
//!
//! The executor only accepts a [`ValidatedPlan`], which can only be built by
//! running extraction and validation, so raw model text never executes.

pub mod extract;

use crate::perception::PerceptionResult;
use crate::prompts;
use cortex_core::error::ProviderError;
use cortex_core::provider::{Provider, TextRequest};
use cortex_core::tool::ToolDefinition;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use extract::{extract_code, validate};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    #[error("invalid plan: {reason}")]
    Invalid { reason: String },

    #[error("planner call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("planner timed out after {0}s")]
    Timeout(u64),
}

/// Code that defines a callable `solve` with no required arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPlan {
    code: String,
}

impl ValidatedPlan {
    /// Extract and validate code from a planner reply.
    pub fn parse(reply: &str) -> Result<Self, PlanError> {
        let code = extract_code(reply);
        validate(&code).map_err(|reason| PlanError::Invalid { reason })?;
        Ok(Self { code })
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

pub struct Planner {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    temperature: f32,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(60),
            temperature: 0.2,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One planner call: prompt, extract, validate.
    pub async fn plan(
        &self,
        perception: &PerceptionResult,
        catalog: &[ToolDefinition],
        input: &str,
        earlier_results: &[String],
        step: usize,
        max_steps: usize,
    ) -> Result<ValidatedPlan, PlanError> {
        let prompt = prompts::planner(perception, catalog, input, earlier_results, step, max_steps);
        let request = TextRequest::new(prompts::stage::PLANNER, prompt).with_temperature(self.temperature);

        let response = tokio::time::timeout(self.timeout, self.provider.generate(request))
            .await
            .map_err(|_| PlanError::Timeout(self.timeout.as_secs()))??;

        match ValidatedPlan::parse(&response.text) {
            Ok(plan) => {
                debug!(step, lines = plan.code().lines().count(), "Plan validated");
                Ok(plan)
            }
            Err(e) => {
                warn!(step, error = %e, "Planner produced an invalid plan");
                Err(e)
            }
        }
    }
}
