use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use riskex_cache::CachedImage;
use riskex_core::{PlacedStimulus, Position};
use riskex_experiment::{AudioClip, FeedbackTone, InputSource, ResponseHandler, Screen};

/// Prints what the subject would see.
#[derive(Debug, Default)]
pub struct ConsoleScreen {
    showing: bool,
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

impl Screen for ConsoleScreen {
    fn show(&mut self, on_screen: &[PlacedStimulus]) {
        let slots: Vec<String> = on_screen
            .iter()
            .map(|p| format!("{}: {}", p.position.as_str(), file_name(&p.stimulus.path)))
            .collect();
        println!("[screen] {}", slots.join(" | "));
        self.showing = true;
    }

    fn clear(&mut self) {
        if self.showing {
            debug!("screen cleared");
        }
        self.showing = false;
    }

    fn show_outcome(&mut self, reward: u32, image: Option<&CachedImage>, at: Option<Position>) {
        let at = at.map_or("center", |p| p.as_str());
        match image {
            Some(image) => println!("[screen] +{reward} ({} at {at})", file_name(&image.path)),
            None => println!("[screen] +{reward} at {at}"),
        }
        self.showing = true;
    }

    fn status(&mut self, text: &str) {
        println!("[status] {text}");
    }

    fn release(&mut self) {
        self.showing = false;
        println!("[screen] session over");
    }
}

/// Terminal bell in place of the reward sound.
#[derive(Debug, Default)]
pub struct Bell;

#[async_trait]
impl FeedbackTone for Bell {
    fn load(&self, clip: AudioClip) {
        info!("Reward tone {} ({} bytes)", clip.path, clip.bytes.len());
    }

    async fn play(&self) {
        debug!("tone");
    }
}

/// Stand-in subject: picks a random target after a random latency, and
/// sometimes does not respond at all.
pub struct SimulatedSubject {
    rng: StdRng,
    latency_ms: (u64, u64),
    miss_rate: f64,
}

impl SimulatedSubject {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            latency_ms: (250, 1_500),
            miss_rate: 0.1,
        }
    }
}

impl InputSource for SimulatedSubject {
    fn arm(&mut self, _on_screen: &[PlacedStimulus], handlers: Vec<ResponseHandler>) {
        if handlers.is_empty() || self.rng.random::<f64>() < self.miss_rate {
            return;
        }
        let pick = handlers[self.rng.random_range(0..handlers.len())].clone();
        let latency = Duration::from_millis(
            self.rng
                .random_range(self.latency_ms.0..=self.latency_ms.1),
        );
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if !pick.fire() {
                debug!("late click on {:?} ignored", pick.target());
            }
        });
    }
}
