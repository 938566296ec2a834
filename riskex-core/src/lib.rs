pub mod phase;
pub mod stimulus;
pub mod trial;

pub use phase::{Phase, SessionPhase, TrialPhase};
pub use stimulus::{DEFAULT_SURE_VALUE, Payload, Position, Stimulus, StimulusKind, Target};
pub use trial::{
    PlacedStimulus, PresentedStimulus, Resolution, ResponseOutcome, TrialRecord, TrialSpec,
};
