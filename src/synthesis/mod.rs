pub mod controller;
pub mod streaming;

pub use controller::{
    TalkController, TalkError, TalkOutcome, TalkPhase, TalkSettings, DEFAULT_SAMPLE_GRANULARITY,
};
pub use streaming::{Feed, PlaybackFeeder, PlaybackSink};
