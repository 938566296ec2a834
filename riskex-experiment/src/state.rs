use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rand::Rng;
use riskex_cache::{CachedImage, ImageCache, file_name_matches};
use riskex_core::{
    Phase, PlacedStimulus, Position, PresentedStimulus, ResponseOutcome, Target, TrialPhase,
    TrialRecord, TrialSpec,
};
use riskex_pump::RewardPump;
use riskex_store::{PersistenceSink, RECORD_VERSION, SavedRecord, SessionRecord, StoreError};
use riskex_timing::Timer;

use crate::block::{BlockOrder, StimulusPool, shuffle};
use crate::config::{ExperimentVariant, Presentation, SessionParameters};
use crate::response::{InputSource, ResponseWindow};
use crate::reward::{self, Delivery, PulsePlan};
use crate::surface::{FeedbackTone, Screen};

/// Everything a running session accumulates.
pub struct SessionState {
    pub subject: String,
    pub variant: ExperimentVariant,
    pub parameters: SessionParameters,
    pub pool: StimulusPool,
    /// Decoded stimulus and outcome images.
    pub images: ImageCache,
    pub block: BlockOrder,
    /// Completed trials.
    pub trial_index: u64,
    pub log: Vec<TrialRecord>,
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        subject: impl Into<String>,
        variant: ExperimentVariant,
        parameters: SessionParameters,
        pool: StimulusPool,
        images: ImageCache,
        block: BlockOrder,
    ) -> Self {
        Self {
            subject: subject.into(),
            variant,
            parameters,
            pool,
            images,
            block,
            trial_index: 0,
            log: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Blocks holding at least one recorded trial. The block order moves to
    /// the next block as soon as one ends, so it can be one ahead of this.
    pub fn blocks_started(&self) -> u64 {
        self.log.last().map_or(0, |record| record.block)
    }

    /// The full session as it would be persisted right now.
    pub fn snapshot(&self, at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            subject: self.subject.clone(),
            experiment_type: self.variant.experiment_type().to_string(),
            parameters: self.parameters.to_value(),
            start_time: self.started_at,
            end_time: at,
            total_trials: self.trial_index,
            total_blocks: self.blocks_started(),
            version: RECORD_VERSION.to_string(),
            saved_locally: false,
            trials: self.log.clone(),
        }
    }
}

/// The outside world the trial loop talks to.
pub struct Collaborators {
    pub screen: Box<dyn Screen>,
    pub input: Box<dyn InputSource>,
    pub pump: Arc<dyn RewardPump>,
    pub tone: Arc<dyn FeedbackTone>,
    pub sink: Arc<dyn PersistenceSink>,
}

struct Presented {
    choice: Option<Target>,
    /// Index into the placed stimuli.
    chosen: Option<usize>,
    reaction_ms: Option<u64>,
}

/// Runs trials one at a time against a [`SessionState`].
pub struct TrialEngine<T, R>
where
    T: Timer,
    R: Rng,
{
    pub timer: T,
    pub rng: R,
    phase: TrialPhase,
    screen: Box<dyn Screen>,
    input: Box<dyn InputSource>,
    pump: Arc<dyn RewardPump>,
    tone: Arc<dyn FeedbackTone>,
    sink: Arc<dyn PersistenceSink>,
}

impl<T, R> TrialEngine<T, R>
where
    T: Timer,
    R: Rng,
{
    pub fn new(timer: T, rng: R, parts: Collaborators) -> Self {
        Self {
            timer,
            rng,
            phase: TrialPhase::Idle,
            screen: parts.screen,
            input: parts.input,
            pump: parts.pump,
            tone: parts.tone,
            sink: parts.sink,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn pump(&self) -> &dyn RewardPump {
        self.pump.as_ref()
    }

    pub fn tone(&self) -> &dyn FeedbackTone {
        self.tone.as_ref()
    }

    pub fn screen(&mut self) -> &mut dyn Screen {
        self.screen.as_mut()
    }

    fn advance_phase(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
        }
    }

    /// Presents the current trial of the block, resolves and records it,
    /// then waits out the inter-trial interval and moves the block on.
    ///
    /// Returns `None` without doing anything when the block is empty.
    pub async fn run_trial(&mut self, state: &mut SessionState) -> Option<TrialRecord> {
        let spec = state.block.current().cloned()?;
        let params = state.parameters.clone();
        let variant = state.variant;
        let trial = state.trial_index + 1;
        let block = state.block.block_index();
        let within = state.block.trial_within_block() as u64 + 1;
        info!(
            "Trial {trial} (Block {block}, Trial {within} of {})",
            state.block.len()
        );

        self.phase = TrialPhase::Idle;
        self.advance_phase();
        let placed = self.place(variant, &spec);
        let presented = self
            .present(variant, &placed, params.choice_timeout())
            .await;

        let outcome = match (presented.choice, presented.chosen) {
            (None, _) => {
                info!("Timeout - no response");
                ResponseOutcome::timed_out()
            }
            (Some(target), Some(i)) => {
                let chosen = &placed[i].stimulus;
                info!("Chose {}", chosen.path);
                let resolved = reward::resolve(chosen, &mut self.rng);
                ResponseOutcome {
                    selected: Some(target),
                    timed_out: false,
                    reward_amount: resolved.reward,
                    resolution: resolved.resolution,
                    reaction_time_ms: presented.reaction_ms,
                }
            }
            (Some(target), None) => {
                info!("Background clicked");
                ResponseOutcome::unrewarded(target, presented.reaction_ms.unwrap_or_default())
            }
        };
        if let Some(next) = self.phase.conclude(outcome.timed_out) {
            self.phase = next;
        }

        self.advance_phase();
        let delivery = if outcome.reward_amount > 0 {
            self.reveal(state, &params, &outcome).await
        } else {
            Delivery::default()
        };

        self.advance_phase();
        let record = TrialRecord {
            trial,
            block,
            trial_within_block: within,
            stimuli: placed.iter().map(PresentedStimulus::from).collect(),
            choice: outcome.selected,
            chosen_stimulus: presented.chosen.map(|i| placed[i].stimulus.path.clone()),
            correct: variant
                .accepts_background()
                .then_some(presented.chosen.is_some()),
            timeout: outcome.timed_out,
            reaction_time_ms: outcome.reaction_time_ms,
            gamble_outcome: outcome.resolution,
            reward_delivered: delivery.pulses,
            pulses_confirmed: delivery.confirmed,
            elapsed_ms: self.timer.since_start().as_millis() as u64,
            timestamp: Utc::now(),
        };
        state.log.push(record.clone());
        state.trial_index += 1;

        if params.is_checkpoint(state.trial_index) {
            self.checkpoint(state).await;
        }

        self.advance_phase();
        self.timer.sleep(params.inter_trial()).await;
        state.block.advance(&mut self.rng);
        self.advance_phase();

        Some(record)
    }

    fn place(&mut self, variant: ExperimentVariant, spec: &TrialSpec) -> Vec<PlacedStimulus> {
        let mut stimuli = spec.stimuli.clone();
        let slots: Vec<Position> = match variant.presentation() {
            Presentation::Sequential => {
                shuffle(&mut stimuli, &mut self.rng);
                vec![Position::Center; stimuli.len()]
            }
            Presentation::Simultaneous => {
                let mut slots = match stimuli.len() {
                    1 => vec![Position::ALL[self.rng.random_range(0..Position::ALL.len())]],
                    2 => vec![Position::Left, Position::Right],
                    _ => Position::ALL.to_vec(),
                };
                shuffle(&mut slots, &mut self.rng);
                slots
            }
        };
        stimuli
            .into_iter()
            .zip(slots)
            .map(|(stimulus, position)| PlacedStimulus { stimulus, position })
            .collect()
    }

    async fn present(
        &mut self,
        variant: ExperimentVariant,
        placed: &[PlacedStimulus],
        timeout: Duration,
    ) -> Presented {
        match variant.presentation() {
            Presentation::Simultaneous => {
                let mut targets: Vec<Target> = placed
                    .iter()
                    .map(|p| Target::Stimulus(p.position))
                    .collect();
                if variant.accepts_background() {
                    targets.push(Target::Background);
                }
                let (choice, reaction_ms) = self.await_response(placed, &targets, timeout).await;
                let chosen = choice.and_then(|target| {
                    placed
                        .iter()
                        .position(|p| Target::Stimulus(p.position) == target)
                });
                Presented {
                    choice,
                    chosen,
                    reaction_ms,
                }
            }
            Presentation::Sequential => {
                for (i, item) in placed.iter().enumerate() {
                    let on_screen = std::slice::from_ref(item);
                    let targets = [Target::Stimulus(item.position)];
                    let (choice, reaction_ms) =
                        self.await_response(on_screen, &targets, timeout).await;
                    if choice.is_some() {
                        return Presented {
                            choice,
                            chosen: Some(i),
                            reaction_ms,
                        };
                    }
                    debug!("no response to {}", item.stimulus.path);
                }
                Presented {
                    choice: None,
                    chosen: None,
                    reaction_ms: None,
                }
            }
        }
    }

    async fn await_response(
        &mut self,
        on_screen: &[PlacedStimulus],
        targets: &[Target],
        timeout: Duration,
    ) -> (Option<Target>, Option<u64>) {
        self.screen.show(on_screen);
        let shown = self.timer.now();
        let (window, handlers) = ResponseWindow::open(targets);
        self.input.arm(on_screen, handlers);

        let choice = window.resolve(self.timer.sleep(timeout)).await;
        let reaction_ms = choice.map(|_| self.timer.elapsed(shown).as_millis() as u64);

        self.input.disarm();
        self.screen.clear();
        (choice, reaction_ms)
    }

    async fn reveal(
        &mut self,
        state: &SessionState,
        params: &SessionParameters,
        outcome: &ResponseOutcome,
    ) -> Delivery {
        let reward = outcome.reward_amount;
        self.timer.sleep(params.outcome_blank()).await;

        let image = outcome_image(state, reward);
        let at = outcome.selected.and_then(|t| t.position());
        self.screen.show_outcome(reward, image, at);

        let plan = PulsePlan {
            duration_ms: params.pump_ms(),
            gap: params.gap(),
        };
        let delivery = reward::deliver(
            reward,
            plan,
            self.pump.as_ref(),
            self.tone.as_ref(),
            &self.timer,
        )
        .await;
        self.screen.clear();
        delivery
    }

    /// Writes the whole session so far. Failures are logged and the log is
    /// kept in memory for the next attempt.
    pub async fn checkpoint(&self, state: &SessionState) -> Option<SavedRecord> {
        info!("Checkpoint after trial {}", state.trial_index);
        match self.save(state).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!(
                    "Checkpoint after trial {} failed: {e}; keeping {} trials in memory",
                    state.trial_index,
                    state.log.len()
                );
                None
            }
        }
    }

    pub async fn save(&self, state: &SessionState) -> Result<SavedRecord, StoreError> {
        self.sink.save(&state.snapshot(Utc::now())).await
    }
}

/// `sure<reward>.png`, taken from the sure bag first.
fn outcome_image(state: &SessionState, reward: u32) -> Option<&CachedImage> {
    let name = format!("sure{reward}.png");
    state
        .pool
        .sure
        .iter()
        .filter(|s| file_name_matches(&s.path, &name))
        .find_map(|s| state.images.get(&s.path))
        .or_else(|| state.images.find_by_file_name(&name))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use riskex_core::{Resolution, Stimulus};
    use riskex_pump::Unplugged;
    use riskex_timing::MonotonicTimer;

    use super::*;
    use crate::response::ResponseHandler;
    use crate::surface::{Headless, Silence};

    /// Answers each window from a script: `Some(slot)` clicks the handler at
    /// that index after `delay`, `None` lets the window time out.
    struct Scripted {
        script: Arc<Mutex<VecDeque<Option<usize>>>>,
        delay: Duration,
        fired: Arc<Mutex<Vec<bool>>>,
    }

    impl InputSource for Scripted {
        fn arm(&mut self, _on_screen: &[PlacedStimulus], handlers: Vec<ResponseHandler>) {
            let next = self.script.lock().pop_front().flatten();
            let Some(slot) = next else {
                return;
            };
            let handler = handlers[slot].clone();
            let delay = self.delay;
            let fired = Arc::clone(&self.fired);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let won = handler.fire();
                fired.lock().push(won);
            });
        }
    }

    struct NoSink;

    #[async_trait]
    impl PersistenceSink for NoSink {
        fn name(&self) -> &str {
            "none"
        }

        async fn save(&self, _record: &SessionRecord) -> Result<SavedRecord, StoreError> {
            Err(StoreError::io(
                "/nowhere",
                std::io::Error::other("sink unavailable"),
            ))
        }
    }

    /// Records `(totalTrials, trials.len())` for every save; fails the first
    /// `failures` of them.
    #[derive(Default)]
    struct CountingSink {
        failures: Mutex<u32>,
        saves: Mutex<Vec<(u64, usize)>>,
    }

    #[async_trait]
    impl PersistenceSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn save(&self, record: &SessionRecord) -> Result<SavedRecord, StoreError> {
            self.saves.lock().push((record.total_trials, record.trials.len()));
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::io(
                    "/flaky",
                    std::io::Error::other("disk full"),
                ));
            }
            Ok(SavedRecord {
                sink: "counting".to_string(),
                location: format!("/saved/{}", record.total_trials).into(),
                local: false,
            })
        }
    }

    fn engine(script: Vec<Option<usize>>) -> TrialEngine<MonotonicTimer, StdRng> {
        engine_with_sink(script, Arc::new(NoSink))
    }

    fn engine_with_sink(
        script: Vec<Option<usize>>,
        sink: Arc<dyn PersistenceSink>,
    ) -> TrialEngine<MonotonicTimer, StdRng> {
        let input = Scripted {
            script: Arc::new(Mutex::new(script.into())),
            delay: Duration::from_millis(250),
            fired: Arc::default(),
        };
        TrialEngine::new(
            MonotonicTimer::new(),
            StdRng::seed_from_u64(5),
            Collaborators {
                screen: Box::new(Headless),
                input: Box::new(input),
                pump: Arc::new(Unplugged),
                tone: Arc::new(Silence),
                sink,
            },
        )
    }

    fn state(variant: ExperimentVariant, pool: StimulusPool) -> SessionState {
        let params = SessionParameters {
            choice_time_out: 1_000,
            inter_trial_interval: 100,
            ..SessionParameters::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let block = BlockOrder::for_variant(variant, &pool, &mut rng);
        SessionState::new("Setta", variant, params, pool, ImageCache::new(), block)
    }

    fn sure_pool() -> StimulusPool {
        StimulusPool {
            sure: (1..=3)
                .map(|i| Stimulus::sure(format!("sure/sure{i}.png")))
                .collect(),
            gamble: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn response_resolves_and_records() {
        let mut engine = engine(vec![Some(0)]);
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());

        let record = engine.run_trial(&mut state).await.unwrap();
        assert_eq!(record.trial, 1);
        assert_eq!(record.block, 1);
        assert_eq!(record.trial_within_block, 1);
        assert!(!record.timeout);
        assert!(record.choice.is_some());
        assert!(matches!(record.reaction_time_ms, Some(250..=251)));
        assert_eq!(record.gamble_outcome, Resolution::Sure);

        let chosen = record.chosen_stimulus.clone().unwrap();
        let value: u32 = chosen
            .trim_start_matches("sure/sure")
            .trim_end_matches(".png")
            .parse()
            .unwrap();
        assert_eq!(record.reward_delivered, value);
        assert_eq!(record.pulses_confirmed, 0);
        assert_eq!(record.correct, None);
        assert_eq!(state.log, vec![record]);
        assert_eq!(engine.phase(), TrialPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_records_no_choice() {
        let mut engine = engine(vec![None]);
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());

        let started = tokio::time::Instant::now();
        let record = engine.run_trial(&mut state).await.unwrap();
        assert!(record.timeout);
        assert_eq!(record.choice, None);
        assert_eq!(record.chosen_stimulus, None);
        assert_eq!(record.reaction_time_ms, None);
        assert_eq!(record.reward_delivered, 0);
        assert_eq!(record.gamble_outcome, Resolution::None);
        assert!(started.elapsed() >= Duration::from_millis(1_100));
        assert_eq!(state.trial_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_of_choice_or_timeout() {
        let script = vec![Some(1), None, Some(0), None, Some(1), Some(0)];
        let mut engine = engine(script);
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());
        for _ in 0..6 {
            engine.run_trial(&mut state).await.unwrap();
        }
        for record in &state.log {
            assert_ne!(record.choice.is_some(), record.timeout);
        }
        assert_eq!(state.log.iter().filter(|r| r.timeout).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn detection_background_click_is_incorrect() {
        let pool = StimulusPool {
            sure: vec![Stimulus::sure("sure/sure2.png")],
            gamble: Vec::new(),
        };
        // Handler 1 is the background.
        let mut engine = engine(vec![Some(1), Some(0), None]);
        let mut state = state(ExperimentVariant::Detection, pool);

        let miss = engine.run_trial(&mut state).await.unwrap();
        assert_eq!(miss.choice, Some(Target::Background));
        assert_eq!(miss.correct, Some(false));
        assert!(!miss.timeout);
        assert_eq!(miss.reward_delivered, 0);
        assert_eq!(miss.chosen_stimulus, None);

        let hit = engine.run_trial(&mut state).await.unwrap();
        assert_eq!(hit.correct, Some(true));
        assert_eq!(hit.reward_delivered, 2);
        assert_eq!(hit.block, 2);

        let late = engine.run_trial(&mut state).await.unwrap();
        assert!(late.timeout);
        assert_eq!(late.correct, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_pair_gives_each_stimulus_a_window() {
        let pool = StimulusPool {
            sure: vec![Stimulus::sure("sure/sure1.png")],
            gamble: vec![Stimulus::gamble("gamble/gamble4v0pw50.png")],
        };
        let mut engine = engine(vec![None, Some(0)]);
        let mut state = state(ExperimentVariant::SequentialPair, pool);

        let record = engine.run_trial(&mut state).await.unwrap();
        assert!(!record.timeout);
        assert!(record.stimuli.iter().all(|s| s.position == Position::Center));
        assert_eq!(record.choice, Some(Target::Stimulus(Position::Center)));
        assert_eq!(
            record.chosen_stimulus.as_deref(),
            Some(record.stimuli[1].path.as_str())
        );
        assert!(matches!(record.reaction_time_ms, Some(250..=251)));
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_failure_keeps_the_log() {
        let mut engine = engine(vec![None; 12]);
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());
        for _ in 0..12 {
            engine.run_trial(&mut state).await.unwrap();
        }
        assert_eq!(state.log.len(), 12);
        assert_eq!(state.block.block_index(), 5);
        assert!(engine.checkpoint(&state).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_land_on_every_tenth_trial() {
        let sink = Arc::new(CountingSink {
            failures: Mutex::new(1),
            ..CountingSink::default()
        });
        let mut engine = engine_with_sink(vec![None; 25], sink.clone());
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());
        assert_eq!(state.parameters.checkpoint_every, 10);

        for _ in 0..25 {
            engine.run_trial(&mut state).await.unwrap();
        }
        assert_eq!(*sink.saves.lock(), vec![(10, 10), (20, 20)]);
        assert_eq!(*sink.failures.lock(), 0);
        assert_eq!(state.log.len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_counts_blocks_with_trials() {
        let mut engine = engine(vec![None; 4]);
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());
        assert_eq!(state.snapshot(Utc::now()).total_blocks, 0);

        for _ in 0..3 {
            engine.run_trial(&mut state).await.unwrap();
        }
        assert_eq!(state.block.block_index(), 2);
        assert_eq!(state.snapshot(Utc::now()).total_blocks, 1);

        engine.run_trial(&mut state).await.unwrap();
        assert_eq!(state.snapshot(Utc::now()).total_blocks, 2);
    }

    #[test]
    fn outcome_image_prefers_the_sure_bag() {
        let mut state = state(ExperimentVariant::SureVsSure, sure_pool());
        for path in ["/archive/sure2.png", "sure/sure2.png", "/archive/sure9.png"] {
            state.images.insert(CachedImage::new(path, 1, 1, vec![0, 0, 0, 255]));
        }
        assert_eq!(&*outcome_image(&state, 2).unwrap().path, "sure/sure2.png");
        assert_eq!(&*outcome_image(&state, 9).unwrap().path, "/archive/sure9.png");
        assert!(outcome_image(&state, 4).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_block_runs_nothing() {
        let mut engine = engine(vec![]);
        let mut state = state(ExperimentVariant::ThreeGambles, StimulusPool::default());
        assert!(engine.run_trial(&mut state).await.is_none());
        assert!(state.log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn positions_are_distinct() {
        let pool = StimulusPool {
            sure: Vec::new(),
            gamble: (1..=4)
                .map(|i| Stimulus::gamble(format!("gamble/gamble{i}v0pw50.png")))
                .collect(),
        };
        let mut engine = engine(vec![None; 4]);
        let mut state = state(ExperimentVariant::ThreeGambles, pool);
        for _ in 0..4 {
            let record = engine.run_trial(&mut state).await.unwrap();
            let mut positions: Vec<&str> = record.stimuli.iter().map(|s| s.position.as_str()).collect();
            positions.sort();
            assert_eq!(positions, vec!["center", "left", "right"]);
        }
    }
}
