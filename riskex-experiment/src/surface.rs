use async_trait::async_trait;
use log::debug;
use riskex_cache::CachedImage;
use riskex_core::{PlacedStimulus, Position};

/// Sound data handed to a [`FeedbackTone`] once assets are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// The subject-facing screen.
pub trait Screen: Send {
    /// Draws the stimuli of a trial, replacing whatever was shown.
    fn show(&mut self, on_screen: &[PlacedStimulus]);

    fn clear(&mut self);

    /// Reveals the amount earned, using the matching sure image when there
    /// is one.
    fn show_outcome(&mut self, reward: u32, image: Option<&CachedImage>, at: Option<Position>);

    /// Operator-facing status line.
    fn status(&mut self, _text: &str) {}

    /// Gives up the screen at the end of a session.
    fn release(&mut self) {}
}

/// Plays the reward feedback sound. Playing must not block.
#[async_trait]
pub trait FeedbackTone: Send + Sync {
    fn load(&self, _clip: AudioClip) {}

    async fn play(&self);
}

/// A screen nobody looks at.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Screen for Headless {
    fn show(&mut self, on_screen: &[PlacedStimulus]) {
        debug!("showing {} stimuli", on_screen.len());
    }

    fn clear(&mut self) {}

    fn show_outcome(&mut self, reward: u32, _image: Option<&CachedImage>, _at: Option<Position>) {
        debug!("outcome: {reward}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

#[async_trait]
impl FeedbackTone for Silence {
    async fn play(&self) {}
}
