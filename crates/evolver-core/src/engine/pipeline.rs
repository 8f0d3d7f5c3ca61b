//! Typed, composable units of candidate transformation.
//!
//! A step consumes one value and produces one value, or fails with a [`PipelineError`].
//! Steps chain with [`PipelineStep::pipe`], which short-circuits on the first failure.
//! Concrete chemistry and docking steps are supplied from outside the library; the
//! engine only chains and runs them.

use crate::core::models::candidate::{Candidate, CandidateError};
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The candidate cannot be scored. It is dropped and the run continues.
    #[error("Candidate is invalid: {message}")]
    CandidateInvalid { message: String },

    /// An external tool or the filesystem failed. The candidate is dropped and the batch
    /// continues.
    #[error("Infrastructure failure: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// The step observed a cooperative termination request and gave up.
    #[error("Pipeline terminated on request")]
    Terminated,
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::CandidateInvalid {
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure_with<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Infrastructure {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn is_candidate_invalid(&self) -> bool {
        matches!(self, Self::CandidateInvalid { .. })
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::infrastructure_with("I/O error", err)
    }
}

impl From<CandidateError> for PipelineError {
    fn from(err: CandidateError) -> Self {
        Self::invalid(err.to_string())
    }
}

pub trait PipelineStep<I, O>: Send + Sync {
    fn execute(&self, input: I) -> Result<O, PipelineError>;

    /// Chains `next` after this step.
    fn pipe<N>(self, next: N) -> Pipe<Self, N, O>
    where
        Self: Sized,
    {
        Pipe {
            first: self,
            second: next,
            _mid: PhantomData,
        }
    }
}

/// Two steps run back to back. Built by [`PipelineStep::pipe`].
pub struct Pipe<A, B, M> {
    first: A,
    second: B,
    _mid: PhantomData<fn() -> M>,
}

impl<I, M, O, A, B> PipelineStep<I, O> for Pipe<A, B, M>
where
    A: PipelineStep<I, M>,
    B: PipelineStep<M, O>,
{
    fn execute(&self, input: I) -> Result<O, PipelineError> {
        let mid = self.first.execute(input)?;
        self.second.execute(mid)
    }
}

/// A closure used as a step.
pub struct FnStep<F>(F);

pub fn step_fn<I, O, F>(f: F) -> FnStep<F>
where
    F: Fn(I) -> Result<O, PipelineError> + Send + Sync,
{
    FnStep(f)
}

impl<I, O, F> PipelineStep<I, O> for FnStep<F>
where
    F: Fn(I) -> Result<O, PipelineError> + Send + Sync,
{
    fn execute(&self, input: I) -> Result<O, PipelineError> {
        (self.0)(input)
    }
}

impl<I, O, S> PipelineStep<I, O> for Arc<S>
where
    S: PipelineStep<I, O> + ?Sized,
{
    fn execute(&self, input: I) -> Result<O, PipelineError> {
        (**self).execute(input)
    }
}

/// A type-erased chain of steps from `I` to `O`.
pub struct Pipeline<I, O> {
    inner: Box<dyn PipelineStep<I, O>>,
}

impl<I: 'static, O: 'static> Pipeline<I, O> {
    /// A pipeline consisting of `step` alone.
    pub fn of<S>(step: S) -> Self
    where
        S: PipelineStep<I, O> + 'static,
    {
        Self {
            inner: Box::new(step),
        }
    }

    pub fn then<P, S>(self, next: S) -> Pipeline<I, P>
    where
        P: 'static,
        S: PipelineStep<O, P> + 'static,
    {
        Pipeline::of(Pipe {
            first: self,
            second: next,
            _mid: PhantomData::<fn() -> O>,
        })
    }
}

impl<I, O> PipelineStep<I, O> for Pipeline<I, O> {
    fn execute(&self, input: I) -> Result<O, PipelineError> {
        self.inner.execute(input)
    }
}

/// A candidate-to-candidate pipeline shared by every worker of a run.
pub type CandidatePipeline = Arc<dyn PipelineStep<Candidate, Candidate>>;
