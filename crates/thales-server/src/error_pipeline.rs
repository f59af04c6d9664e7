//! Error-to-status translation.
//!
//! Every failure that escapes a call's chain passes through the
//! [`ErrorPipeline`] exactly once. It separates two kinds of failure:
//!
//! - **Call-level failures** ([`CallError`]) become a [`Status`] carrying the
//!   trailer accumulated on the call, are reported to the [`ErrorHook`], and
//!   are logged unless the pipeline is silent.
//! - **Contract violations** (a panic with a non-error payload, or `next`
//!   invoked twice) are bugs in middleware or handler code. They are not
//!   converted into a status and never reach the hook.

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use thales_core::{CallError, ContractViolation, Context, ErrorHook, NoopErrorHook, Status};

/// Log target for error diagnostics.
pub const ERROR_TARGET: &str = "thales::error";

/// Diagnostic settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorConfig {
    /// Suppress the diagnostic entirely.
    pub silent: bool,
    /// Render the backtrace, or the full cause chain, instead of the message.
    pub verbose: bool,
}

impl ErrorConfig {
    /// Silent configuration.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            silent: true,
            verbose: false,
        }
    }

    /// Verbose configuration.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            silent: false,
            verbose: true,
        }
    }
}

impl From<thales_config::ErrorsConfig> for ErrorConfig {
    fn from(config: thales_config::ErrorsConfig) -> Self {
        Self {
            silent: config.silent,
            verbose: config.verbose,
        }
    }
}

/// A failure as it escaped the chain.
pub enum Thrown {
    /// The chain returned an error.
    Error(CallError),
    /// The chain panicked with this payload.
    Panic(Box<dyn Any + Send>),
}

impl Thrown {
    /// Sorts the failure into a call-level error or a contract violation.
    ///
    /// Panic payloads that are a [`CallError`], a [`Status`], or an
    /// [`anyhow::Error`] count as errors. Anything else, a panic message
    /// included, is a non-error.
    pub fn classify(self) -> Result<CallError, ContractViolation> {
        match self {
            Self::Error(CallError::Reentry(err)) => Err(ContractViolation::Reentry(err)),
            Self::Error(err) => Ok(err),
            Self::Panic(payload) => classify_panic(payload),
        }
    }
}

impl std::fmt::Debug for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Panic(_) => f.write_str("Panic(..)"),
        }
    }
}

impl From<CallError> for Thrown {
    fn from(err: CallError) -> Self {
        Self::Error(err)
    }
}

fn classify_panic(payload: Box<dyn Any + Send>) -> Result<CallError, ContractViolation> {
    let payload = match payload.downcast::<CallError>() {
        Ok(err) => return Thrown::Error(*err).classify(),
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<Status>() {
        Ok(status) => return Ok(CallError::Status(*status)),
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<anyhow::Error>() {
        Ok(err) => return Ok(CallError::Other(*err)),
        Err(payload) => payload,
    };

    let value = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    };
    Err(ContractViolation::NonError(value))
}

/// Central error normalization shared by every call adapter.
#[derive(Clone)]
pub struct ErrorPipeline {
    config: ErrorConfig,
    hook: Arc<dyn ErrorHook>,
}

impl ErrorPipeline {
    /// Creates a pipeline with an injected hook.
    pub fn new(config: ErrorConfig, hook: Arc<dyn ErrorHook>) -> Self {
        Self { config, hook }
    }

    /// Returns the diagnostic settings.
    #[must_use]
    pub fn config(&self) -> ErrorConfig {
        self.config
    }

    /// Handles one failure that escaped a call's chain.
    ///
    /// Returns the status to terminate the call with. The error's own status
    /// metadata is merged over the trailer already accumulated on the call.
    ///
    /// # Errors
    ///
    /// Returns the [`ContractViolation`] if the failure is not a
    /// recognized error. The caller must still terminate the call.
    pub fn on_error(&self, thrown: Thrown, ctx: &Context) -> Result<Status, ContractViolation> {
        let error = match thrown.classify() {
            Ok(error) => error,
            Err(violation) => {
                tracing::error!(
                    target: ERROR_TARGET,
                    service = ctx.service(),
                    method = ctx.method(),
                    request_id = %ctx.request_id(),
                    "contract violation: {violation}"
                );
                return Err(violation);
            }
        };

        let status = error.status();
        let mut trailer = ctx.trailer();
        trailer.extend_from(status.metadata());
        let status = status.with_trailer(trailer);

        self.notify(&error, ctx);
        self.report(&error, ctx);

        Ok(status)
    }

    fn notify(&self, error: &CallError, ctx: &Context) {
        let hook = &self.hook;
        if std::panic::catch_unwind(AssertUnwindSafe(|| hook.on_error(error, ctx))).is_err() {
            tracing::error!(
                target: ERROR_TARGET,
                service = ctx.service(),
                method = ctx.method(),
                "error hook panicked"
            );
        }
    }

    fn report(&self, error: &CallError, ctx: &Context) {
        let Some(diagnostic) = self.diagnostic(error) else {
            return;
        };
        tracing::error!(
            target: ERROR_TARGET,
            service = ctx.service(),
            method = ctx.method(),
            request_id = %ctx.request_id(),
            code = error.code().name(),
            "{diagnostic}"
        );
    }

    /// The text logged for `error`, or `None` when the pipeline is silent.
    #[must_use]
    pub fn diagnostic(&self, error: &CallError) -> Option<String> {
        (!self.config.silent).then(|| render(error, self.config.verbose))
    }
}

impl Default for ErrorPipeline {
    fn default() -> Self {
        Self::new(ErrorConfig::default(), Arc::new(NoopErrorHook))
    }
}

impl std::fmt::Debug for ErrorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Renders the diagnostic: a blank line, the text indented by two spaces,
/// and a trailing blank line.
#[must_use]
pub fn render(error: &CallError, verbose: bool) -> String {
    let text = if verbose {
        verbose_text(error)
    } else {
        error.to_string()
    };
    let indented: Vec<String> = text.lines().map(|line| format!("  {line}")).collect();
    format!("\n{}\n\n", indented.join("\n"))
}

fn verbose_text(error: &CallError) -> String {
    if let CallError::Other(err) = error {
        let backtrace = err.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            return format!("{err}\n{backtrace}");
        }
    }

    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str("\nCaused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
