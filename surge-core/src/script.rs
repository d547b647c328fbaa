use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::template::Variable;

/// One message exchange within a script.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: Arc<str>,
    /// Message body before variable substitution.
    pub template: String,
    /// URL for HTTP steps, logical channel for async steps.
    pub target: String,
    pub method: http::Method,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn new(name: &str, target: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name),
            template: String::new(),
            target: target.into(),
            method: http::Method::GET,
            headers: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The ordered steps a virtual user runs per iteration, plus the variables they use.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: Arc<str>,
    pub steps: Vec<Step>,
    pub variables: BTreeMap<Arc<str>, Variable>,
}

impl Script {
    pub fn new(name: &str, steps: Vec<Step>, variables: Vec<Variable>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::EmptyScript(name.to_string()));
        }

        let variables = variables
            .into_iter()
            .map(|v| (Arc::<str>::from(v.name()), v))
            .collect();

        Ok(Self {
            name: Arc::from(name),
            steps,
            variables,
        })
    }

    pub fn last_step_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}
