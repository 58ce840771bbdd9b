//! Chat workflow state machine: `input → selection → review`, with reset to `input`.
//!
//! Each step owns exactly the data it needs, so states like "narration present
//! while still collecting input" cannot be built. The server rebuilds the machine
//! from the persisted session (`Workflow::resume`) and drives every transition
//! through it, which is also where confirmed facts are checked against the facts
//! the user was shown.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::facts::models::Fact;
use crate::models::session::VideoSession;
use crate::narration::models::Narration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Input,
    Selection,
    Review,
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("fact {0} does not exist in this session")]
    UnknownFact(usize),

    #[error("select at least one fact first")]
    EmptySelection,

    #[error("fact selection is locked while the narration is generated")]
    SelectionLocked,

    #[error("fact selection has not been submitted")]
    SelectionNotLocked,

    #[error("this action is not available during the {0:?} step")]
    WrongStep(WorkflowStep),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Workflow {
    #[default]
    Input,
    Selection {
        facts: Vec<Fact>,
        selected: BTreeSet<usize>,
        locked: bool,
    },
    Review {
        facts: Vec<Fact>,
        confirmed: Vec<Fact>,
        narration: Narration,
    },
}

impl Workflow {
    pub fn new() -> Self {
        Workflow::Input
    }

    pub fn step(&self) -> WorkflowStep {
        match self {
            Workflow::Input => WorkflowStep::Input,
            Workflow::Selection { .. } => WorkflowStep::Selection,
            Workflow::Review { .. } => WorkflowStep::Review,
        }
    }

    /// Rebuilds the machine from what a session has persisted.
    ///
    /// Confirmed facts plus a script resume straight into review; extracted facts
    /// resume into selection with the saved selection; anything else is input.
    pub fn resume(session: &VideoSession) -> Self {
        let facts = session.parsed_facts();
        match (session.parsed_confirmed_facts(), session.parsed_narration()) {
            (Some(confirmed), Some(narration)) if !confirmed.is_empty() => Workflow::Review {
                facts,
                confirmed,
                narration,
            },
            _ if !facts.is_empty() => {
                let selected = session
                    .selected_fact_indices
                    .iter()
                    .filter_map(|&i| usize::try_from(i).ok())
                    .filter(|&i| i < facts.len())
                    .collect();
                Workflow::Selection {
                    facts,
                    selected,
                    locked: false,
                }
            }
            _ => Workflow::Input,
        }
    }

    /// `input → selection` when extraction found something. An empty list leaves
    /// the machine in `input` so the user can retry.
    pub fn facts_extracted(self, facts: Vec<Fact>) -> Result<Self, WorkflowError> {
        match self {
            Workflow::Input if facts.is_empty() => Ok(Workflow::Input),
            Workflow::Input => Ok(Workflow::Selection {
                facts,
                selected: BTreeSet::new(),
                locked: false,
            }),
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// Flips one fact in or out of the selection.
    pub fn toggle_fact(&mut self, index: usize) -> Result<(), WorkflowError> {
        match self {
            Workflow::Selection {
                facts,
                selected,
                locked,
            } => {
                if *locked {
                    return Err(WorkflowError::SelectionLocked);
                }
                if index >= facts.len() {
                    return Err(WorkflowError::UnknownFact(index));
                }
                if !selected.remove(&index) {
                    selected.insert(index);
                }
                Ok(())
            }
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// Replaces the selection wholesale (used when the client sends explicit indices).
    pub fn select_exactly(&mut self, indices: &[usize]) -> Result<(), WorkflowError> {
        match self {
            Workflow::Selection {
                facts,
                selected,
                locked,
            } => {
                if *locked {
                    return Err(WorkflowError::SelectionLocked);
                }
                if let Some(&bad) = indices.iter().find(|&&i| i >= facts.len()) {
                    return Err(WorkflowError::UnknownFact(bad));
                }
                *selected = indices.iter().copied().collect();
                Ok(())
            }
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// Locks the selection and returns the confirmed facts in the order shown.
    /// An empty selection is refused and the machine stays unlocked.
    pub fn lock_selection(&mut self) -> Result<Vec<Fact>, WorkflowError> {
        match self {
            Workflow::Selection {
                facts,
                selected,
                locked,
            } => {
                if *locked {
                    return Err(WorkflowError::SelectionLocked);
                }
                if selected.is_empty() {
                    return Err(WorkflowError::EmptySelection);
                }
                *locked = true;
                Ok(selected.iter().map(|&i| facts[i].clone()).collect())
            }
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// Narration failed: unlock so the user can adjust and resubmit.
    pub fn narration_failed(&mut self) {
        if let Workflow::Selection { locked, .. } = self {
            *locked = false;
        }
    }

    /// `selection (locked) → review`.
    pub fn narration_generated(self, narration: Narration) -> Result<Self, WorkflowError> {
        match self {
            Workflow::Selection {
                facts,
                selected,
                locked: true,
            } => {
                let confirmed = selected.iter().map(|&i| facts[i].clone()).collect();
                Ok(Workflow::Review {
                    facts,
                    confirmed,
                    narration,
                })
            }
            Workflow::Selection { locked: false, .. } => Err(WorkflowError::SelectionNotLocked),
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// Replaces the narration while staying in review (manual edits).
    pub fn narration_edited(&mut self, edited: Narration) -> Result<(), WorkflowError> {
        match self {
            Workflow::Review { narration, .. } => {
                *narration = edited;
                Ok(())
            }
            other => Err(WorkflowError::WrongStep(other.step())),
        }
    }

    /// `review → selection` so the narration can be regenerated. The confirmed
    /// facts come back as the selection. Already in selection is a no-op.
    pub fn reopen_selection(self) -> Result<Self, WorkflowError> {
        match self {
            Workflow::Review {
                facts, confirmed, ..
            } => {
                let selected = facts
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| confirmed.contains(f))
                    .map(|(i, _)| i)
                    .collect();
                Ok(Workflow::Selection {
                    facts,
                    selected,
                    locked: false,
                })
            }
            selection @ Workflow::Selection { .. } => Ok(selection),
            Workflow::Input => Err(WorkflowError::WrongStep(WorkflowStep::Input)),
        }
    }

    /// Back to `input` from anywhere. The caller keeps the session id.
    pub fn reset(self) -> Self {
        Workflow::Input
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        match self {
            Workflow::Selection { selected, .. } => selected.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn narration(&self) -> Option<&Narration> {
        match self {
            Workflow::Review { narration, .. } => Some(narration),
            _ => None,
        }
    }
}
