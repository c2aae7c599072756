//! Allocation of pipeline release counters.
//!
//! Counters are allocated optimistically: a release takes the current
//! counter plus one and verifies afterwards that it is the oldest release
//! carrying that counter. A release losing the race is moved to the next
//! free counter.

use std::{future::Future, ops::ControlFlow, sync::Arc};

use jiff::Timestamp;
use snafu::{ResultExt as _, Snafu};
use tracing::instrument;

use crate::{
    model::{
        CdWorkflowId, CiArtifactId, DeploymentType, EnvConfigOverrideId, PipelineId,
        PipelineOverride, PipelineOverrideId, UserId,
    },
    store::{PipelineOverrideRepository, StoreError},
};

/// How often a release counter is verified before giving up.
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 5;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to read the current release counter of pipeline {pipeline_id}"))]
    ReadCounter {
        source: StoreError,
        pipeline_id: PipelineId,
    },

    #[snafu(display("unable to save release of pipeline {pipeline_id}"))]
    SaveOverride {
        source: StoreError,
        pipeline_id: PipelineId,
    },

    #[snafu(display("unable to list releases of pipeline {pipeline_id} with counter {counter}"))]
    ListDuplicates {
        source: StoreError,
        pipeline_id: PipelineId,
        counter: i64,
    },

    #[snafu(display("unable to move release {override_id} to counter {counter}"))]
    UpdateCounter {
        source: StoreError,
        override_id: PipelineOverrideId,
        counter: i64,
    },

    #[snafu(display(
        "release counter of override {override_id} is still duplicated after {attempts} attempts"
    ))]
    DuplicateVerificationRetryExceeded {
        override_id: PipelineOverrideId,
        attempts: u32,
    },
}

/// Runs `attempt` until it breaks, at most `max_attempts` times.
///
/// Every attempt receives the state the previous one continued with.
/// Returns the value an attempt broke with, or the last state if every
/// attempt continued. Errors end the loop immediately.
pub async fn bounded_retry<S, T, E, F, Fut>(
    max_attempts: u32,
    mut state: S,
    mut attempt: F,
) -> Result<ControlFlow<T, S>, E>
where
    F: FnMut(u32, S) -> Fut,
    Fut: Future<Output = Result<ControlFlow<T, S>, E>>,
{
    for number in 1..=max_attempts {
        match attempt(number, state).await? {
            ControlFlow::Break(value) => return Ok(ControlFlow::Break(value)),
            ControlFlow::Continue(next) => state = next,
        }
    }
    Ok(ControlFlow::Continue(state))
}

/// What a new release is made of.
#[derive(Clone, Copy, Debug)]
pub struct NewRelease {
    pub pipeline_id: PipelineId,
    pub env_config_override_id: EnvConfigOverrideId,
    pub ci_artifact_id: CiArtifactId,
    pub cd_workflow_id: CdWorkflowId,
    pub deployment_type: DeploymentType,
    pub user: UserId,
    pub triggered_at: Timestamp,
}

pub struct PipelineOverrideAllocator {
    repository: Arc<dyn PipelineOverrideRepository>,
}

impl PipelineOverrideAllocator {
    pub fn new(repository: Arc<dyn PipelineOverrideRepository>) -> Self {
        Self { repository }
    }

    /// Saves a new release with a release counter no other release of the
    /// pipeline carries.
    #[instrument(skip(self), fields(pipeline.id = %release.pipeline_id))]
    pub async fn allocate(&self, release: NewRelease) -> Result<PipelineOverride> {
        let counter = self.next_counter(release.pipeline_id).await?;

        let pipeline_override = self
            .repository
            .save_pipeline_override(PipelineOverride::new(
                release.pipeline_id,
                release.env_config_override_id,
                release.ci_artifact_id,
                release.cd_workflow_id,
                counter,
                release.deployment_type,
                release.user,
                release.triggered_at,
            ))
            .await
            .context(SaveOverrideSnafu {
                pipeline_id: release.pipeline_id,
            })?;

        self.verify_unique_counter(pipeline_override, release.triggered_at).await
    }

    async fn next_counter(&self, pipeline_id: PipelineId) -> Result<i64> {
        let current = self
            .repository
            .current_release_counter(pipeline_id)
            .await
            .context(ReadCounterSnafu { pipeline_id })?;
        Ok(current + 1)
    }

    /// Moves the release to the next free counter until it is the oldest one
    /// carrying its counter.
    async fn verify_unique_counter(
        &self,
        pipeline_override: PipelineOverride,
        triggered_at: Timestamp,
    ) -> Result<PipelineOverride> {
        let outcome = bounded_retry(
            MAX_VERIFICATION_ATTEMPTS,
            pipeline_override,
            move |attempt, mut current: PipelineOverride| async move {
                let counter = current.pipeline_release_counter;
                let holders = self
                    .repository
                    .find_by_pipeline_and_counter(current.pipeline_id, counter)
                    .await
                    .context(ListDuplicatesSnafu {
                        pipeline_id: current.pipeline_id,
                        counter,
                    })?;

                if holders.first().is_some_and(|oldest| oldest.id == current.id) {
                    return Ok(ControlFlow::Break(current));
                }

                let next = self.next_counter(current.pipeline_id).await?;
                tracing::info!(
                    pipeline_override.id = %current.id,
                    attempt,
                    duplicate_counter = counter,
                    next_counter = next,
                    "release counter is taken by a concurrent trigger, moving to the next one"
                );
                current.pipeline_release_counter = next;
                let user = current.audit.updated_by;
                current.audit.touch(user, triggered_at);
                self.repository
                    .update_pipeline_override(&current)
                    .await
                    .context(UpdateCounterSnafu {
                        override_id: current.id,
                        counter: next,
                    })?;
                Ok::<_, Error>(ControlFlow::Continue(current))
            },
        )
        .await?;

        match outcome {
            ControlFlow::Break(verified) => Ok(verified),
            ControlFlow::Continue(unverified) => {
                tracing::error!(
                    pipeline_override.id = %unverified.id,
                    attempts = MAX_VERIFICATION_ATTEMPTS,
                    "unable to verify release counter"
                );
                DuplicateVerificationRetryExceededSnafu {
                    override_id: unverified.id,
                    attempts: MAX_VERIFICATION_ATTEMPTS,
                }
                .fail()
            }
        }
    }
}
