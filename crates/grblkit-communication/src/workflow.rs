//! Workflow state reducer.
//!
//! The single owner of the application-level Idle/Running/Paused/Testing
//! state. Every transition flows through this reducer; the controller,
//! feeder, and sender consult it but never compute workflow state on their
//! own. Transitions return the event to publish, or None when the signal
//! was a no-op (pause is idempotent, resume is gated).

use grblkit_core::{HoldReason, WorkflowEvent, WorkflowState};

/// Outcome of a resume request
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    /// Resume granted; publish the event and release the feeder
    Resumed(WorkflowEvent),
    /// The hold requires an explicit acknowledgment first
    NeedsAcknowledgement(HoldReason),
    /// Not paused; nothing to resume
    NotPaused,
}

/// Reduces workflow signals into state transitions.
pub struct WorkflowController {
    state: WorkflowState,
    hold_reason: Option<HoldReason>,
    acknowledged: bool,
    /// State to return to on resume (Running or Testing)
    resume_target: WorkflowState,
}

impl Default for WorkflowController {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowController {
    /// A reducer starting in Idle
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            hold_reason: None,
            acknowledged: false,
            resume_target: WorkflowState::Running,
        }
    }

    /// Current workflow state
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Why the workflow is paused, if it is
    pub fn hold_reason(&self) -> Option<&HoldReason> {
        self.hold_reason.as_ref()
    }

    /// Whether a job or test may be started
    pub fn is_idle(&self) -> bool {
        self.state == WorkflowState::Idle
    }

    /// A job began streaming
    pub fn start_running(&mut self) -> Option<WorkflowEvent> {
        if self.state != WorkflowState::Idle {
            return None;
        }
        self.transition(WorkflowState::Running, None)
    }

    /// A check-mode dry run began
    pub fn start_testing(&mut self) -> Option<WorkflowEvent> {
        if self.state != WorkflowState::Idle {
            return None;
        }
        self.transition(WorkflowState::Testing, None)
    }

    /// Pause with the given reason. Idempotent: a pause signal while
    /// already paused keeps the original reason and returns None.
    pub fn pause(&mut self, reason: HoldReason) -> Option<WorkflowEvent> {
        match self.state {
            WorkflowState::Running | WorkflowState::Testing => {
                self.resume_target = self.state;
                self.acknowledged = false;
                self.transition(WorkflowState::Paused, Some(reason))
            }
            WorkflowState::Paused | WorkflowState::Idle => None,
        }
    }

    /// Acknowledge the current hold (tool seated, door closed). Returns
    /// true if there was an acknowledgment-gated hold to acknowledge.
    pub fn acknowledge_hold(&mut self) -> bool {
        match &self.hold_reason {
            Some(reason)
                if self.state == WorkflowState::Paused
                    && reason.cause.requires_acknowledgement() =>
            {
                self.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Request a resume.
    ///
    /// Acknowledgment-gated holds (tool change, door) refuse until
    /// [`acknowledge_hold`](Self::acknowledge_hold) has been called;
    /// operator holds resume immediately.
    pub fn try_resume(&mut self) -> ResumeOutcome {
        if self.state != WorkflowState::Paused {
            return ResumeOutcome::NotPaused;
        }

        if let Some(reason) = &self.hold_reason {
            if reason.cause.requires_acknowledgement() && !self.acknowledged {
                tracing::debug!(reason = %reason, "resume refused, hold not acknowledged");
                return ResumeOutcome::NeedsAcknowledgement(reason.clone());
            }
        }

        let target = self.resume_target;
        match self.transition(target, None) {
            Some(event) => ResumeOutcome::Resumed(event),
            None => ResumeOutcome::NotPaused,
        }
    }

    /// The job finished, was stopped, or the session ended. Always lands
    /// in Idle; returns the event only if the state actually changed.
    pub fn force_idle(&mut self) -> Option<WorkflowEvent> {
        if self.state == WorkflowState::Idle {
            return None;
        }
        self.transition(WorkflowState::Idle, None)
    }

    fn transition(
        &mut self,
        state: WorkflowState,
        hold_reason: Option<HoldReason>,
    ) -> Option<WorkflowEvent> {
        tracing::info!(from = %self.state, to = %state, "workflow transition");
        self.state = state;
        self.hold_reason = hold_reason.clone();
        if state != WorkflowState::Paused {
            self.acknowledged = false;
        }
        Some(WorkflowEvent::StateChanged {
            state,
            hold_reason,
        })
    }
}
