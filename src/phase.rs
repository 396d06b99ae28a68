//! Verification workflow phases.
//!
//! The phase is never stored. It is re-derived from the loaded record's
//! `verified` and `verified_hands` fields every time it is needed, so it
//! cannot drift from the record.

use std::fmt;

use crate::record::AnnotationRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No annotation loaded.
    Empty,
    /// The reviewer has not yet said whether the prediction is correct.
    AwaitingCorrectnessJudgment,
    /// Judged, waiting for the reviewer's hand boxes.
    AwaitingHandCorrection,
    /// Both submissions stored.
    Complete,
}

/// Something the reviewer can do from a prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Judge { is_valid: bool },
    Clear,
    Submit,
    Next,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Judge { is_valid: false } => "no",
            Action::Judge { is_valid: true } => "yes",
            Action::Clear => "Clear",
            Action::Submit => "Submit",
            Action::Next => "Next",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Banner text plus the actions offered under it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub text: &'static str,
    pub actions: &'static [Action],
}

const JUDGE_ACTIONS: &[Action] = &[
    Action::Judge { is_valid: false },
    Action::Judge { is_valid: true },
];
const CORRECTION_ACTIONS: &[Action] = &[Action::Clear, Action::Submit];
const COMPLETE_ACTIONS: &[Action] = &[Action::Next];

pub fn derive_phase(record: Option<&AnnotationRecord>) -> Phase {
    match record {
        None => Phase::Empty,
        Some(record) if !record.verified => Phase::AwaitingCorrectnessJudgment,
        Some(record) if !record.has_verified_hands() => Phase::AwaitingHandCorrection,
        Some(_) => Phase::Complete,
    }
}

impl Phase {
    pub fn prompt(self) -> Option<Prompt> {
        let text = match self {
            Phase::Empty => return None,
            Phase::AwaitingCorrectnessJudgment => "Does the action appear to be correct?",
            Phase::AwaitingHandCorrection => {
                "Please draw a box over the region(s) containing hands."
            }
            Phase::Complete => "Thank you for your submission!",
        };
        Some(Prompt {
            text,
            actions: self.actions(),
        })
    }

    /// Actions offered by this phase's prompt.
    pub fn actions(self) -> &'static [Action] {
        match self {
            Phase::Empty => &[],
            Phase::AwaitingCorrectnessJudgment => JUDGE_ACTIONS,
            Phase::AwaitingHandCorrection => CORRECTION_ACTIONS,
            Phase::Complete => COMPLETE_ACTIONS,
        }
    }

    /// Whether `action` is legal here. Loading is also legal with nothing
    /// loaded, so a failed load can be retried.
    pub fn allows(self, action: Action) -> bool {
        (self == Phase::Empty && action == Action::Next) || self.actions().contains(&action)
    }

    /// Whether the canvas accepts new reviewer boxes.
    pub fn drawing_enabled(self) -> bool {
        self == Phase::AwaitingHandCorrection
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Empty => "no annotation loaded",
            Phase::AwaitingCorrectnessJudgment => "awaiting correctness judgment",
            Phase::AwaitingHandCorrection => "awaiting hand correction",
            Phase::Complete => "complete",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn phase_of(value: serde_json::Value) -> Phase {
        let record: AnnotationRecord = serde_json::from_value(value).unwrap();
        derive_phase(Some(&record))
    }

    #[test]
    fn nothing_loaded_is_empty() {
        assert_eq!(derive_phase(None), Phase::Empty);
        assert_eq!(Phase::Empty.prompt(), None);
    }

    #[test]
    fn unverified_awaits_judgment_whatever_the_hands() {
        assert_eq!(
            phase_of(json!({ "id": 1, "verified": false })),
            Phase::AwaitingCorrectnessJudgment
        );
        assert_eq!(
            phase_of(json!({ "id": 1, "verified": false, "verified_hands": [[[1, 2], [3, 4]]] })),
            Phase::AwaitingCorrectnessJudgment
        );
        assert_eq!(phase_of(json!({ "id": 1 })), Phase::AwaitingCorrectnessJudgment);
    }

    #[test]
    fn verified_without_hands_awaits_correction() {
        assert_eq!(
            phase_of(json!({ "id": 1, "verified": true })),
            Phase::AwaitingHandCorrection
        );
        assert_eq!(
            phase_of(json!({ "id": 1, "verified": true, "verified_hands": null })),
            Phase::AwaitingHandCorrection
        );
    }

    #[test]
    fn verified_with_hands_is_complete() {
        assert_eq!(
            phase_of(json!({ "id": 1, "verified": true, "verified_hands": [] })),
            Phase::Complete
        );
    }

    #[test]
    fn prompts_offer_phase_actions() {
        let judge = Phase::AwaitingCorrectnessJudgment.prompt().unwrap();
        assert_eq!(
            judge.actions.iter().map(|a| a.label()).collect::<Vec<_>>(),
            ["no", "yes"]
        );

        let correct = Phase::AwaitingHandCorrection.prompt().unwrap();
        assert_eq!(correct.actions, &[Action::Clear, Action::Submit]);

        let done = Phase::Complete.prompt().unwrap();
        assert_eq!(done.text, "Thank you for your submission!");
        assert_eq!(done.actions, &[Action::Next]);
    }

    #[test]
    fn legality_follows_the_phase() {
        assert!(Phase::Empty.allows(Action::Next));
        assert!(!Phase::Empty.allows(Action::Submit));
        assert!(Phase::AwaitingCorrectnessJudgment.allows(Action::Judge { is_valid: false }));
        assert!(!Phase::AwaitingCorrectnessJudgment.allows(Action::Next));
        assert!(Phase::AwaitingHandCorrection.allows(Action::Clear));
        assert!(!Phase::AwaitingHandCorrection.allows(Action::Judge { is_valid: true }));
        assert!(Phase::Complete.allows(Action::Next));
    }

    #[test]
    fn only_hand_correction_draws() {
        assert!(Phase::AwaitingHandCorrection.drawing_enabled());
        assert!(!Phase::AwaitingCorrectnessJudgment.drawing_enabled());
        assert!(!Phase::Complete.drawing_enabled());
        assert!(!Phase::Empty.drawing_enabled());
    }
}
