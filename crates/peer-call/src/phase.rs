use std::fmt;

/// Negotiation phase of one peer. The single source of truth for whether a
/// trigger is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NegotiationPhase {
    /// No session description exchanged yet.
    #[default]
    Idle,
    /// Local offer created and sent, awaiting the answer.
    Offering,
    /// Remote offer received, local answer being prepared.
    Answering,
    /// Both descriptions applied.
    Stable,
}

impl NegotiationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationPhase::Idle => "idle",
            NegotiationPhase::Offering => "offering",
            NegotiationPhase::Answering => "answering",
            NegotiationPhase::Stable => "stable",
        }
    }

    /// Looks up the transition table for `trigger` in this phase.
    pub fn step(self, trigger: Trigger) -> Step {
        use NegotiationPhase::*;
        match (self, trigger) {
            (Idle, Trigger::StartCall) => Step::Enter(Offering),
            (Idle, Trigger::Offer) => Step::Enter(Answering),
            (Offering, Trigger::Answer) => Step::Enter(Stable),
            (Answering, Trigger::LocalAnswer) => Step::Enter(Stable),
            (Stable, Trigger::Candidate) => Step::Apply,
            (_, Trigger::Candidate) => Step::Buffer,
            _ => Step::Drop,
        }
    }
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that may move the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    StartCall,
    Offer,
    Answer,
    Candidate,
    /// The local answer for an accepted remote offer has been applied.
    LocalAnswer,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::StartCall => "start_call",
            Trigger::Offer => "offer",
            Trigger::Answer => "answer",
            Trigger::Candidate => "candidate",
            Trigger::LocalAnswer => "local_answer",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Enter(NegotiationPhase),
    Buffer,
    Apply,
    Drop,
}

#[cfg(test)]
mod tests {
    use super::NegotiationPhase::*;
    use super::*;

    #[test]
    fn table_matches_negotiation_rules() {
        let cases = [
            (Idle, Trigger::Offer, Step::Enter(Answering)),
            (Idle, Trigger::Answer, Step::Drop),
            (Idle, Trigger::Candidate, Step::Buffer),
            (Idle, Trigger::StartCall, Step::Enter(Offering)),
            (Offering, Trigger::Offer, Step::Drop),
            (Offering, Trigger::Answer, Step::Enter(Stable)),
            (Offering, Trigger::Candidate, Step::Buffer),
            (Offering, Trigger::StartCall, Step::Drop),
            (Answering, Trigger::Offer, Step::Drop),
            (Answering, Trigger::Answer, Step::Drop),
            (Answering, Trigger::Candidate, Step::Buffer),
            (Answering, Trigger::StartCall, Step::Drop),
            (Answering, Trigger::LocalAnswer, Step::Enter(Stable)),
            (Stable, Trigger::Offer, Step::Drop),
            (Stable, Trigger::Answer, Step::Drop),
            (Stable, Trigger::Candidate, Step::Apply),
            (Stable, Trigger::StartCall, Step::Drop),
        ];
        for (phase, trigger, expected) in cases {
            assert_eq!(phase.step(trigger), expected, "{phase} x {trigger}");
        }
    }

    #[test]
    fn local_answer_only_completes_answering() {
        for phase in [Idle, Offering, Stable] {
            assert_eq!(phase.step(Trigger::LocalAnswer), Step::Drop);
        }
    }
}
