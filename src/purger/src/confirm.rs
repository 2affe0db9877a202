//! Operator confirmation before a target is purged.

use common::config::DeclinePolicy;
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;

use crate::error::PurgeError;
use crate::metrics::CountersSummary;
use crate::resolver::PurgeTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    /// Yes for this target and every following one
    YesToAll,
}

/// Asks whether a target may be purged.
#[cfg_attr(test, mockall::automock)]
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<Decision, PurgeError>;
}

/// Answers yes without asking, for forced and unattended runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConfirm;

impl Confirmer for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> Result<Decision, PurgeError> {
        Ok(Decision::Yes)
    }
}

/// Interactive prompt on the controlling terminal.
#[derive(Default)]
pub struct TerminalConfirmer {
    theme: ColorfulTheme,
}

impl TerminalConfirmer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, prompt: &str) -> Result<Decision, PurgeError> {
        const CHOICES: [(&str, Decision); 3] = [
            ("Yes", Decision::Yes),
            ("No", Decision::No),
            ("Yes to all", Decision::YesToAll),
        ];

        let selection = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(CHOICES.map(|(label, _)| label))
            .default(1)
            .interact_opt()
            .map_err(|e| PurgeError::Confirmation(e.to_string()))?;

        // Escape counts as no
        Ok(selection.map_or(Decision::No, |index| CHOICES[index].1))
    }
}

/// Confirmation checkpoint of a run.
///
/// Remembers a "yes to all" answer for the rest of the run.
pub struct ConfirmationGate {
    confirmer: Box<dyn Confirmer>,
    decline_policy: DeclinePolicy,
    yes_to_all: bool,
}

impl ConfirmationGate {
    pub fn new(confirmer: Box<dyn Confirmer>, decline_policy: DeclinePolicy) -> Self {
        Self {
            confirmer,
            decline_policy,
            yes_to_all: false,
        }
    }

    /// Gate that never asks
    pub fn unattended() -> Self {
        Self::new(Box::new(AlwaysConfirm), DeclinePolicy::SkipTarget)
    }

    /// Whether the candidates of `target` may be deleted.
    ///
    /// `Ok(false)` skips the target; declining under
    /// [`DeclinePolicy::AbortRun`] returns [`PurgeError::Aborted`].
    pub fn check(
        &mut self,
        target: &PurgeTarget,
        candidates: usize,
        candidate_bytes: u64,
    ) -> Result<bool, PurgeError> {
        if self.yes_to_all {
            return Ok(true);
        }

        let prompt = format!(
            "Purge {} files ({} MB) of {}?",
            candidates,
            CountersSummary::format_mb(candidate_bytes),
            target
        );
        match self.confirmer.confirm(&prompt)? {
            Decision::Yes => Ok(true),
            Decision::YesToAll => {
                self.yes_to_all = true;
                Ok(true)
            }
            Decision::No => match self.decline_policy {
                DeclinePolicy::SkipTarget => {
                    tracing::info!(target = %target, "Skipping module on operator request");
                    Ok(false)
                }
                DeclinePolicy::AbortRun => Err(PurgeError::Aborted(target.to_string())),
            },
        }
    }
}
