//! Declarative input validation
//!
//! A [`Constraints`] set is evaluated as a pure function of the input. A
//! [`ValidationStore`] keeps the latest result of one field observable.
//!
//! Evaluation order: presence (an empty required field reports only the
//! presence message), then format, then numericality. Every other violation
//! is accumulated in that order.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tidepool_core::{TidepoolError, TidepoolResult};
use tracing::debug;

use crate::observable::{Observable, Readable};

static STRICT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?$").expect("strict number pattern is valid")
});

/// Validity of one input field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationState {
    /// Nothing validated since creation or the last reset
    #[default]
    Untouched,
    Valid,
    /// Violated constraints, in evaluation order
    Invalid(Vec<String>),
}

impl ValidationState {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationState::Valid)
    }

    pub fn messages(&self) -> &[String] {
        match self {
            ValidationState::Invalid(messages) => messages,
            _ => &[],
        }
    }
}

/// The field must not be empty
#[derive(Debug, Clone)]
pub struct Presence {
    pub message: String,
    /// Accept empty and whitespace-only input
    pub allow_empty: bool,
}

/// The field must match a pattern
#[derive(Debug, Clone)]
pub struct Format {
    pub pattern: Regex,
    pub message: String,
}

/// The field must be a number within bounds
#[derive(Debug, Clone, Default)]
pub struct Numericality {
    /// Only accept plain decimal notation (no `+`, exponents or whitespace)
    pub strict: bool,
    pub only_integer: bool,
    pub greater_than: Option<f64>,
    pub greater_than_or_equal_to: Option<f64>,
    pub less_than: Option<f64>,
    pub less_than_or_equal_to: Option<f64>,
}

impl Numericality {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    pub fn only_integer(mut self) -> Self {
        self.only_integer = true;
        self
    }

    pub fn greater_than(mut self, bound: f64) -> Self {
        self.greater_than = Some(bound);
        self
    }

    pub fn greater_than_or_equal_to(mut self, bound: f64) -> Self {
        self.greater_than_or_equal_to = Some(bound);
        self
    }

    pub fn less_than(mut self, bound: f64) -> Self {
        self.less_than = Some(bound);
        self
    }

    pub fn less_than_or_equal_to(mut self, bound: f64) -> Self {
        self.less_than_or_equal_to = Some(bound);
        self
    }

    fn check(&self, input: &str, messages: &mut Vec<String>) {
        let parsed = if self.strict {
            if STRICT_NUMBER.is_match(input) {
                input.parse::<f64>().ok()
            } else {
                None
            }
        } else {
            input.trim().parse::<f64>().ok().filter(|v| v.is_finite())
        };

        let Some(value) = parsed else {
            messages.push("is not a number".to_string());
            return;
        };

        if self.only_integer && value.fract() != 0.0 {
            messages.push("must be an integer".to_string());
        }
        if let Some(bound) = self.greater_than {
            if value <= bound {
                messages.push(format!("must be greater than {bound}"));
            }
        }
        if let Some(bound) = self.greater_than_or_equal_to {
            if value < bound {
                messages.push(format!("must be greater than or equal to {bound}"));
            }
        }
        if let Some(bound) = self.less_than {
            if value >= bound {
                messages.push(format!("must be less than {bound}"));
            }
        }
        if let Some(bound) = self.less_than_or_equal_to {
            if value > bound {
                messages.push(format!("must be less than or equal to {bound}"));
            }
        }
    }
}

/// Static constraint set for one field
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub presence: Option<Presence>,
    pub format: Option<Format>,
    pub numericality: Option<Numericality>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presence(mut self, message: impl Into<String>) -> Self {
        self.presence = Some(Presence {
            message: message.into(),
            allow_empty: false,
        });
        self
    }

    pub fn format(mut self, pattern: Regex, message: impl Into<String>) -> Self {
        self.format = Some(Format {
            pattern,
            message: message.into(),
        });
        self
    }

    pub fn numericality(mut self, numericality: Numericality) -> Self {
        self.numericality = Some(numericality);
        self
    }

    /// Evaluate `input` against every constraint
    pub fn evaluate(&self, input: &str) -> ValidationState {
        let blank = input.trim().is_empty();

        if let Some(presence) = &self.presence {
            if blank && !presence.allow_empty {
                return ValidationState::Invalid(vec![presence.message.clone()]);
            }
        }

        // Absent optional values are not checked further
        if input.is_empty() {
            return ValidationState::Valid;
        }

        let mut messages = Vec::new();

        if let Some(format) = &self.format {
            if !format.pattern.is_match(input) {
                messages.push(format.message.clone());
            }
        }

        if let Some(numericality) = &self.numericality {
            numericality.check(input, &mut messages);
        }

        if messages.is_empty() {
            ValidationState::Valid
        } else {
            ValidationState::Invalid(messages)
        }
    }
}

/// Observable validation state of one input field
pub struct ValidationStore {
    field: String,
    constraints: Constraints,
    state: Observable<ValidationState>,
}

impl ValidationStore {
    pub fn new(field: impl Into<String>, constraints: Constraints) -> Self {
        Self {
            field: field.into(),
            constraints,
            state: Observable::new(ValidationState::Untouched),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Evaluate `input` and publish the result
    pub fn validate(&self, input: &str) -> ValidationState {
        let result = self.constraints.evaluate(input);
        debug!("Validated {}: {:?}", self.field, result);
        self.state.set(result.clone());
        result
    }

    /// Validate on explicit submit, turning violations into an error
    pub fn submit(&self, input: &str) -> TidepoolResult<()> {
        match self.validate(input) {
            ValidationState::Invalid(messages) => Err(TidepoolError::Invalid {
                field: self.field.clone(),
                messages,
            }),
            _ => Ok(()),
        }
    }

    /// Back to [`ValidationState::Untouched`]
    pub fn reset(&self) {
        self.state.set(ValidationState::Untouched);
    }

    pub fn get(&self) -> ValidationState {
        self.state.get()
    }

    pub fn reader(&self) -> Readable<ValidationState> {
        self.state.reader()
    }
}

impl fmt::Debug for ValidationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationStore")
            .field("field", &self.field)
            .field("state", &self.state.get())
            .finish()
    }
}
