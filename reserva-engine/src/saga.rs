use async_trait::async_trait;
use tracing::{error, info};

use reserva_core::EngineError;

/// One stage of a multi-step operation. Forward action and its undo live on
/// the same type so compensation logic stays next to what it compensates.
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut C) -> Result<(), EngineError>;

    /// Undo a previously completed `run`. Default: nothing to undo.
    async fn compensate(&self, _ctx: &mut C) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("saga step `{step}` failed: {error}")]
pub struct SagaError {
    pub step: &'static str,
    #[source]
    pub error: EngineError,
    /// Compensations that themselves failed, in the order they were
    /// attempted. Non-empty means manual reconciliation is required.
    pub compensation_failures: Vec<(&'static str, EngineError)>,
}

/// Executes steps in order; on the first failure, compensates every
/// completed step in reverse order. A failing compensation is logged as a
/// fatal incident and reported, never swallowed.
pub struct Saga<C: Send> {
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send> Saga<C> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn then(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self, ctx: &mut C) -> Result<(), SagaError> {
        for (index, step) in self.steps.iter().enumerate() {
            let Err(err) = step.run(ctx).await else {
                continue;
            };

            info!(step = step.name(), error = %err, "saga step failed, compensating");
            let mut compensation_failures = Vec::new();
            for done in self.steps[..index].iter().rev() {
                if let Err(comp_err) = done.compensate(ctx).await {
                    error!(
                        step = done.name(),
                        error = %comp_err,
                        "compensation failed, manual reconciliation required"
                    );
                    compensation_failures.push((done.name(), comp_err));
                }
            }

            return Err(SagaError {
                step: step.name(),
                error: err,
                compensation_failures,
            });
        }
        Ok(())
    }
}

impl<C: Send> Default for Saga<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        log: Vec<&'static str>,
    }

    struct Step {
        name: &'static str,
        fail: bool,
        fail_compensation: bool,
    }

    impl Step {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                fail_compensation: false,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                fail: true,
                fail_compensation: false,
            }
        }
    }

    #[async_trait]
    impl SagaStep<Trace> for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, ctx: &mut Trace) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Internal(format!("{} blew up", self.name)));
            }
            ctx.log.push(self.name);
            Ok(())
        }

        async fn compensate(&self, ctx: &mut Trace) -> Result<(), EngineError> {
            if self.fail_compensation {
                return Err(EngineError::Compensation(self.name.to_string()));
            }
            ctx.log.push("undo");
            ctx.log.push(self.name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let saga = Saga::new().then(Step::ok("first")).then(Step::ok("second"));
        let mut ctx = Trace::default();
        saga.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.log, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn failure_compensates_completed_steps_in_reverse() {
        let saga = Saga::new()
            .then(Step::ok("first"))
            .then(Step::ok("second"))
            .then(Step::failing("third"));
        let mut ctx = Trace::default();

        let err = saga.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.step, "third");
        assert!(err.compensation_failures.is_empty());
        assert_eq!(
            ctx.log,
            vec!["first", "second", "undo", "second", "undo", "first"]
        );
    }

    #[tokio::test]
    async fn failed_compensation_is_reported_not_swallowed() {
        let saga = Saga::new()
            .then(Step {
                name: "first",
                fail: false,
                fail_compensation: true,
            })
            .then(Step::failing("second"));
        let mut ctx = Trace::default();

        let err = saga.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.step, "second");
        assert_eq!(err.compensation_failures.len(), 1);
        assert_eq!(err.compensation_failures[0].0, "first");
    }
}
