use strum::{AsRefStr, Display, EnumString};

use forgeflow_config::Config;
use forgeflow_utils::types::{PlannedStep, StepMode, StepPlan};

/// The orchestrated steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum StepName {
    SyncTask,
    MarkInProgress,
    Preflight,
    Clarify,
    CreateBranch,
    GenerateAndValidate,
    Approval,
    CommitFiles,
    CreatePullRequest,
    PostComment,
    MarkInReview,
}

impl StepName {
    pub const ALL: [StepName; 11] = [
        Self::SyncTask,
        Self::MarkInProgress,
        Self::Preflight,
        Self::Clarify,
        Self::CreateBranch,
        Self::GenerateAndValidate,
        Self::Approval,
        Self::CommitFiles,
        Self::CreatePullRequest,
        Self::PostComment,
        Self::MarkInReview,
    ];

    /// 1-based position; stable regardless of which steps are enabled.
    #[must_use]
    pub fn number(self) -> u32 {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .map_or(0, |i| i as u32 + 1)
    }

    /// Config key that switches the step off, if it can be switched off.
    #[must_use]
    pub const fn toggle_key(self) -> Option<&'static str> {
        match self {
            Self::SyncTask => Some("steps.sync_task"),
            Self::MarkInProgress => Some("steps.mark_in_progress"),
            Self::Preflight => Some("steps.preflight"),
            Self::Clarify => Some("interrupts.clarification"),
            Self::CreateBranch => Some("steps.create_branch"),
            Self::Approval => Some("interrupts.approval"),
            Self::PostComment => Some("steps.post_comment"),
            Self::MarkInReview => Some("steps.mark_in_review"),
            Self::GenerateAndValidate | Self::CommitFiles | Self::CreatePullRequest => None,
        }
    }

    fn enabled_in(self, config: &Config) -> bool {
        match self {
            Self::SyncTask => config.steps.sync_task,
            Self::MarkInProgress => config.steps.mark_in_progress,
            Self::Preflight => config.steps.preflight,
            Self::Clarify => config.interrupts.clarification,
            Self::CreateBranch => config.steps.create_branch,
            Self::Approval => config.interrupts.approval,
            Self::PostComment => config.steps.post_comment,
            Self::MarkInReview => config.steps.mark_in_review,
            Self::GenerateAndValidate | Self::CommitFiles | Self::CreatePullRequest => true,
        }
    }
}

/// Decide once, from configuration, which steps run.
///
/// The plan is recorded when the run starts; a resumed run uses the recorded
/// plan, not the current configuration.
#[must_use]
pub fn plan_steps(config: &Config) -> StepPlan {
    let steps = StepName::ALL
        .iter()
        .map(|step| {
            let mode = if step.enabled_in(config) {
                StepMode::Enabled
            } else {
                StepMode::Skipped {
                    reason: format!(
                        "disabled by {}",
                        step.toggle_key().unwrap_or("configuration")
                    ),
                }
            };
            PlannedStep {
                name: step.to_string(),
                number: step.number(),
                mode,
            }
        })
        .collect();
    StepPlan { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numbering_is_fixed() {
        assert_eq!(StepName::SyncTask.number(), 1);
        assert_eq!(StepName::GenerateAndValidate.number(), 6);
        assert_eq!(StepName::MarkInReview.number(), 11);
        assert_eq!(StepName::CreatePullRequest.to_string(), "create_pull_request");
    }

    #[test]
    fn test_disabled_steps_keep_their_numbers() {
        let config = Config::builder()
            .sync_task(false)
            .post_comment(false)
            .approval(true)
            .build()
            .unwrap();
        let plan = plan_steps(&config);

        assert_eq!(plan.total_steps(), 11);
        let sync = plan.get("sync_task").unwrap();
        assert_eq!(sync.number, 1);
        assert_eq!(
            sync.mode,
            StepMode::Skipped {
                reason: "disabled by steps.sync_task".to_string()
            }
        );
        assert!(plan.is_enabled("approval"));
        assert!(!plan.is_enabled("clarify"));
        assert!(!plan.is_enabled("post_comment"));
        assert!(plan.is_enabled("commit_files"));
        for (i, step) in plan.steps.iter().enumerate() {
            assert_eq!(step.number, i as u32 + 1);
        }
    }

    proptest! {
        #[test]
        fn prop_plan_covers_every_step_in_order(
            sync in any::<bool>(),
            preflight in any::<bool>(),
            comment in any::<bool>(),
            approval in any::<bool>(),
            clarification in any::<bool>(),
        ) {
            let config = Config::builder()
                .sync_task(sync)
                .preflight_enabled(preflight)
                .post_comment(comment)
                .approval(approval)
                .clarification(clarification)
                .build()
                .unwrap();
            let plan = plan_steps(&config);

            prop_assert_eq!(plan.steps.len(), StepName::ALL.len());
            for (step, planned) in StepName::ALL.iter().zip(&plan.steps) {
                prop_assert_eq!(planned.name.as_str(), step.as_ref());
                prop_assert_eq!(planned.number, step.number());
            }
            prop_assert_eq!(plan.is_enabled("sync_task"), sync);
            prop_assert_eq!(plan.is_enabled("preflight"), preflight);
            prop_assert_eq!(plan.is_enabled("approval"), approval);
            prop_assert!(plan.is_enabled("generate_and_validate"));
        }
    }
}
