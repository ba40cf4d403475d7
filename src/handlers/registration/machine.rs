//! Registration state machine.
//!
//! A pure transition function: the pipeline feeds it the result of each
//! step and performs whatever action it returns. Nothing here touches a
//! socket, so every path can be tested directly.

/// Where a session is in registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegState {
    /// A resume token was presented and is being checked.
    AwaitingResume,
    /// Waiting for capability negotiation to end.
    #[default]
    AwaitingCredentials,
    /// Waiting for NICK and USER.
    AwaitingNickUserRealname,
    AuthenticationCheck,
    HostnameResolution,
    NickAssignment,
    BanRecheck,
    DefaultModeApplication,
    Registered,
    /// The session now belongs to another, already registered client.
    Handoff,
    /// The session is being closed.
    Exited,
}

impl RegState {
    /// No further registration events are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Registered | Self::Handoff | Self::Exited)
    }

    /// States that a new registration attempt may start from.
    fn is_waiting(self) -> bool {
        matches!(
            self,
            Self::AwaitingResume | Self::AwaitingCredentials | Self::AwaitingNickUserRealname
        )
    }
}

/// Snapshot of the pending session fields relevant to registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub resume_requested: bool,
    /// Nick, username and realname are all set and non-empty.
    pub fields_complete: bool,
    pub cap_negotiating: bool,
    pub sts_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    PasswordMismatch,
    SaslRequired,
    TorSaslRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickOutcome {
    Assigned,
    /// Multiclient reattach to a different client.
    Reattached,
    InsecureReattach,
    /// In use, erroneous or reserved. The client may pick another nick.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffKind {
    Resumed,
    Reattached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegEvent {
    /// A registration-relevant command arrived.
    Attempt(Readiness),
    ResumeFinished { resumed: bool },
    AuthChecked { outcome: AuthOutcome, hostname_known: bool },
    HostnameResolved,
    NickAssigned(NickOutcome),
    BansChecked { banned: bool },
    ModesApplied,
}

/// Side effect the pipeline must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until the next registration command.
    Wait,
    AttemptResume,
    SendStsBurstAndExit,
    CheckAuth,
    RejectAuth(AuthOutcome),
    ResolveHostname,
    AssignNick,
    /// Report the nick error, forget the pending nick and wait.
    ClearNickAndWait,
    RejectInsecureReattach,
    Handoff(HandoffKind),
    CheckBans,
    RejectBanned,
    ApplyDefaultModes,
    CompleteRegistration,
    /// The event does not apply in the current state.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: RegState,
    pub action: Action,
}

impl Transition {
    fn to(state: RegState, action: Action) -> Self {
        Self { state, action }
    }
}

pub fn step(state: RegState, event: RegEvent) -> Transition {
    use Action as A;
    use RegState as S;

    match (state, event) {
        (s, RegEvent::Attempt(ready)) if s.is_waiting() => {
            if ready.resume_requested {
                Transition::to(S::AwaitingResume, A::AttemptResume)
            } else if !ready.fields_complete {
                Transition::to(S::AwaitingNickUserRealname, A::Wait)
            } else if ready.cap_negotiating {
                Transition::to(S::AwaitingCredentials, A::Wait)
            } else if ready.sts_only {
                Transition::to(S::Exited, A::SendStsBurstAndExit)
            } else {
                Transition::to(S::AuthenticationCheck, A::CheckAuth)
            }
        }

        (S::AwaitingResume, RegEvent::ResumeFinished { resumed: true }) => {
            Transition::to(S::Handoff, A::Handoff(HandoffKind::Resumed))
        }
        (S::AwaitingResume, RegEvent::ResumeFinished { resumed: false }) => {
            Transition::to(S::AwaitingCredentials, A::Wait)
        }

        (S::AuthenticationCheck, RegEvent::AuthChecked { outcome, hostname_known }) => {
            match outcome {
                AuthOutcome::Success if hostname_known => {
                    Transition::to(S::NickAssignment, A::AssignNick)
                }
                AuthOutcome::Success => Transition::to(S::HostnameResolution, A::ResolveHostname),
                failure => Transition::to(S::Exited, A::RejectAuth(failure)),
            }
        }

        (S::HostnameResolution, RegEvent::HostnameResolved) => {
            Transition::to(S::NickAssignment, A::AssignNick)
        }

        (S::NickAssignment, RegEvent::NickAssigned(outcome)) => match outcome {
            NickOutcome::Assigned => Transition::to(S::BanRecheck, A::CheckBans),
            NickOutcome::Reattached => {
                Transition::to(S::Handoff, A::Handoff(HandoffKind::Reattached))
            }
            NickOutcome::InsecureReattach => Transition::to(S::Exited, A::RejectInsecureReattach),
            NickOutcome::Rejected => Transition::to(S::AwaitingNickUserRealname, A::ClearNickAndWait),
        },

        (S::BanRecheck, RegEvent::BansChecked { banned: true }) => {
            Transition::to(S::Exited, A::RejectBanned)
        }
        (S::BanRecheck, RegEvent::BansChecked { banned: false }) => {
            Transition::to(S::DefaultModeApplication, A::ApplyDefaultModes)
        }

        (S::DefaultModeApplication, RegEvent::ModesApplied) => {
            Transition::to(S::Registered, A::CompleteRegistration)
        }

        (state, _) => Transition::to(state, A::Ignore),
    }
}
