/// Transition Retry Loop - Stateright Model
/// Checks the driver's loop: due → connect → evaluate → command → confirm → retry,
/// bounded by the deadline at which the opposite transition becomes due.
///
/// Run with: cargo test --release transition_model -- --nocapture

use stateright::*;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Ending {
    Succeeded,
    Skipped,
    DeadlinePassed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    /// Top of the retry loop
    LoopHead,
    /// Connected and holding a fresh snapshot
    Evaluated,
    AwaitingConfirmation,
    RetryWait,
    Done(Ending),
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum DriverAction {
    BecomeDue,
    ConnectFails,
    /// Snapshot fetched; `latency` ticks pass while doing so
    FetchSnapshot { latency: u8 },
    AlreadyCharging,
    PolicySkips,
    SendCommand,
    CommandFails,
    Abandon,
    Confirmed,
    NotConfirmed,
    WaitRetry,
    LeaveLoop,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DriverModel {
    pub phase: Phase,
    pub time: u8,
    pub commands: u8,
    pub command_after_deadline: bool,
}

/// Time is in ticks; `deadline` is relative to the due instant at tick 0
#[derive(Clone)]
pub struct TransitionChecker {
    pub deadline: u8,
    pub retry_interval: u8,
    pub confirm_delay: u8,
    pub max_latency: u8,
}

impl Default for TransitionChecker {
    fn default() -> Self {
        Self {
            deadline: 12,
            retry_interval: 5,
            confirm_delay: 1,
            max_latency: 2,
        }
    }
}

impl Model for TransitionChecker {
    type State = DriverModel;
    type Action = DriverAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![DriverModel {
            phase: Phase::Waiting,
            time: 0,
            commands: 0,
            command_after_deadline: false,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        match &state.phase {
            Phase::Waiting => actions.push(DriverAction::BecomeDue),

            Phase::LoopHead => {
                if state.time < self.deadline {
                    actions.push(DriverAction::ConnectFails);
                    for latency in 0..=self.max_latency {
                        actions.push(DriverAction::FetchSnapshot { latency });
                    }
                } else {
                    actions.push(DriverAction::LeaveLoop);
                }
            }

            Phase::Evaluated => {
                actions.push(DriverAction::AlreadyCharging);
                actions.push(DriverAction::PolicySkips);
                // Mirrors the deadline check right before the command is sent
                if state.time < self.deadline {
                    actions.push(DriverAction::SendCommand);
                    actions.push(DriverAction::CommandFails);
                } else {
                    actions.push(DriverAction::Abandon);
                }
            }

            Phase::AwaitingConfirmation => {
                actions.push(DriverAction::Confirmed);
                actions.push(DriverAction::NotConfirmed);
            }

            Phase::RetryWait => actions.push(DriverAction::WaitRetry),

            Phase::Done(_) => {}
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            DriverAction::BecomeDue => next.phase = Phase::LoopHead,

            DriverAction::ConnectFails | DriverAction::CommandFails | DriverAction::NotConfirmed => {
                if action == DriverAction::CommandFails {
                    next.command_after_deadline |= state.time >= self.deadline;
                    next.commands = state.commands.saturating_add(1);
                }
                next.phase = Phase::RetryWait;
            }

            DriverAction::FetchSnapshot { latency } => {
                next.time = state.time.saturating_add(latency);
                next.phase = Phase::Evaluated;
            }

            DriverAction::AlreadyCharging => next.phase = Phase::Done(Ending::Succeeded),

            DriverAction::PolicySkips => next.phase = Phase::Done(Ending::Skipped),

            DriverAction::SendCommand => {
                next.command_after_deadline |= state.time >= self.deadline;
                next.commands = state.commands.saturating_add(1);
                next.time = state.time.saturating_add(self.confirm_delay);
                next.phase = Phase::AwaitingConfirmation;
            }

            DriverAction::Confirmed => next.phase = Phase::Done(Ending::Succeeded),

            DriverAction::WaitRetry => {
                next.time = state.time.saturating_add(self.retry_interval).min(self.deadline);
                next.phase = Phase::LoopHead;
            }

            DriverAction::Abandon | DriverAction::LeaveLoop => {
                next.phase = Phase::Done(Ending::DeadlinePassed);
            }
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Safety: no command is ever sent at or after the deadline
            Property::always("no_command_after_deadline", |_, state: &DriverModel| {
                !state.command_after_deadline
            }),
            // Safety: a missed deadline only happens once time has reached it
            Property::always("deadline_outcome_only_at_deadline", |checker: &TransitionChecker, state: &DriverModel| {
                state.phase != Phase::Done(Ending::DeadlinePassed) || state.time >= checker.deadline
            }),
            // Safety: retry waits never push time past the deadline
            Property::always("loop_head_not_past_deadline", |checker: &TransitionChecker, state: &DriverModel| {
                state.phase != Phase::LoopHead || state.time <= checker.deadline
            }),
            // Liveness: every run ends
            Property::eventually("transition_terminates", |_, state: &DriverModel| {
                matches!(state.phase, Phase::Done(_))
            }),
            Property::sometimes("can_succeed_by_command", |_, state: &DriverModel| {
                state.phase == Phase::Done(Ending::Succeeded) && state.commands > 0
            }),
            Property::sometimes("can_miss_deadline", |_, state: &DriverModel| {
                state.phase == Phase::Done(Ending::DeadlinePassed)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn transition_model_check_properties() {
        let checker = TransitionChecker::default().checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();
    }

    #[test]
    fn transition_model_retries_are_bounded() {
        let model = TransitionChecker::default();
        let checker = model.checker().spawn_bfs().join();
        assert!(
            checker.unique_state_count() > 10,
            "Expected more than 10 states, got {}",
            checker.unique_state_count()
        );
    }

    #[test]
    fn transition_model_slow_fetch_abandons() {
        // Fetch finishing exactly at the deadline must not lead to a command
        let model = TransitionChecker::default();
        let mut state = model.init_states()[0].clone();

        state = model.next_state(&state, DriverAction::BecomeDue).unwrap();
        state = model.next_state(&state, DriverAction::ConnectFails).unwrap();
        state = model.next_state(&state, DriverAction::WaitRetry).unwrap();
        state = model.next_state(&state, DriverAction::ConnectFails).unwrap();
        state = model.next_state(&state, DriverAction::WaitRetry).unwrap();
        assert_eq!(state.time, 10);
        assert_eq!(state.phase, Phase::LoopHead);

        state = model
            .next_state(&state, DriverAction::FetchSnapshot { latency: 2 })
            .unwrap();
        assert_eq!(state.time, 12);

        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert!(!actions.contains(&DriverAction::SendCommand));
        assert!(actions.contains(&DriverAction::Abandon));
    }

    #[test]
    fn transition_model_retry_wait_clamped() {
        let model = TransitionChecker::default();
        let state = DriverModel {
            phase: Phase::RetryWait,
            time: 11,
            commands: 2,
            command_after_deadline: false,
        };
        let next = model.next_state(&state, DriverAction::WaitRetry).unwrap();
        assert_eq!(next.time, model.deadline);

        let mut actions = Vec::new();
        model.actions(&next, &mut actions);
        assert_eq!(actions, vec![DriverAction::LeaveLoop]);
    }
}
