use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use riskex_cache::ImageCache;
use riskex_core::{Phase, SessionPhase, Stimulus, StimulusKind};
use riskex_store::{SavedRecord, SessionRecord};
use riskex_timing::Timer;
use tokio::sync::watch;

use crate::assets::{AssetProvider, ParameterLoader};
use crate::block::{BlockOrder, StimulusPool};
use crate::config::ExperimentConfig;
use crate::error::{AssetError, SessionError};
use crate::state::{SessionState, TrialEngine};

/// Why the trial loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TrialLimit,
    EmptyBlock,
}

#[derive(Debug)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub record: SessionRecord,
    /// Where the final record was written; `None` if every sink failed.
    pub saved: Option<SavedRecord>,
}

/// Owns a session from parameter loading to the final save.
pub struct SessionController<T, R>
where
    T: Timer,
    R: Rng,
{
    config: ExperimentConfig,
    engine: TrialEngine<T, R>,
    phase: SessionPhase,
}

impl<T, R> SessionController<T, R>
where
    T: Timer,
    R: Rng,
{
    pub fn new(config: ExperimentConfig, engine: TrialEngine<T, R>) -> Self {
        Self {
            config,
            engine,
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn engine(&self) -> &TrialEngine<T, R> {
        &self.engine
    }

    fn advance_phase(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
        }
    }

    /// Loads parameters and assets, builds the first block and brings up
    /// the pump. Parameter and asset failures abort the start; a missing
    /// pump does not.
    pub async fn start(
        &mut self,
        subject: &str,
        parameters: &dyn ParameterLoader,
        assets: &dyn AssetProvider,
    ) -> Result<SessionState, SessionError> {
        if subject.trim().is_empty() {
            return Err(SessionError::NoSubject);
        }
        self.phase = SessionPhase::Idle;
        self.advance_phase();

        let loaded = self.load(subject, parameters, assets).await;
        let state = match loaded {
            Ok(state) => state,
            Err(e) => {
                error!("Could not start session for {subject}: {e}");
                self.phase = SessionPhase::Idle;
                return Err(e);
            }
        };

        let pump_ready = self.engine.pump().initialize().await;
        let status = if pump_ready {
            "Pump connected"
        } else {
            warn!("Starting without a pump; rewards will be logged but not delivered");
            "Pump not connected"
        };
        self.engine.screen().status(status);

        info!(
            "Session started: {subject}, {} ({} trials per block)",
            state.variant,
            state.block.len()
        );
        self.advance_phase();
        Ok(state)
    }

    async fn load(
        &mut self,
        subject: &str,
        parameters: &dyn ParameterLoader,
        assets: &dyn AssetProvider,
    ) -> Result<SessionState, SessionError> {
        let params = parameters.load(subject).await?;
        let variant = self.config.variant;
        let mut images = ImageCache::new();
        let mut pool = StimulusPool::default();

        if variant.needs_sure() {
            pool.sure = load_bag(assets, &self.config.sure_folder, StimulusKind::Sure, &mut images)
                .await?;
        } else {
            // Only needed to show the amount won.
            match load_bag(assets, &self.config.sure_folder, StimulusKind::Sure, &mut images).await
            {
                Ok(sure) => pool.sure = sure,
                Err(e) => warn!("Outcome images unavailable: {e}"),
            }
        }
        if variant.needs_gamble() {
            pool.gamble = load_bag(
                assets,
                &self.config.gamble_folder,
                StimulusKind::Gamble,
                &mut images,
            )
            .await?;
        }

        if let Some(path) = &self.config.tone {
            match assets.fetch_audio(path).await {
                Ok(clip) => self.engine.tone().load(clip),
                Err(e) => warn!("Reward tone unavailable: {e}"),
            }
        }

        let block = BlockOrder::for_variant(variant, &pool, &mut self.engine.rng);
        if block.is_empty() {
            warn!(
                "No {variant} trials can be built from {} sure and {} gamble stimuli",
                pool.sure.len(),
                pool.gamble.len()
            );
        }
        Ok(SessionState::new(
            subject, variant, params, pool, images, block,
        ))
    }

    /// Runs trials until a stop is requested, the trial limit is reached or
    /// there is nothing to present. Stop requests take effect between trials.
    pub async fn run(
        &mut self,
        state: &mut SessionState,
        stop: &watch::Receiver<bool>,
    ) -> StopReason {
        loop {
            if *stop.borrow() {
                info!("Stop requested after {} trials", state.trial_index);
                return StopReason::Requested;
            }
            if let Some(limit) = state.parameters.total_trials {
                if state.trial_index >= limit {
                    info!("Reached {limit} trials");
                    return StopReason::TrialLimit;
                }
            }
            if self.engine.run_trial(state).await.is_none() {
                warn!("Block is empty, ending session");
                return StopReason::EmptyBlock;
            }
        }
    }

    /// Final save, then releases the screen and the pump.
    pub async fn finish(&mut self, state: SessionState, reason: StopReason) -> SessionSummary {
        self.advance_phase();
        let record = state.snapshot(Utc::now());
        let saved = match self.engine.save(&state).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!("Final save failed, session data was not persisted: {e}");
                None
            }
        };
        self.engine.screen().release();
        self.engine.pump().shutdown().await;
        self.advance_phase();
        info!(
            "Session finished after {} trials in {} blocks",
            record.total_trials, record.total_blocks
        );
        SessionSummary {
            reason,
            record,
            saved,
        }
    }

    /// `start`, `run` and `finish` in one go.
    pub async fn run_session(
        &mut self,
        subject: &str,
        parameters: &dyn ParameterLoader,
        assets: &dyn AssetProvider,
        stop: &watch::Receiver<bool>,
    ) -> Result<SessionSummary, SessionError> {
        let mut state = self.start(subject, parameters, assets).await?;
        let reason = self.run(&mut state, stop).await;
        Ok(self.finish(state, reason).await)
    }
}

async fn load_bag(
    assets: &dyn AssetProvider,
    folder: &str,
    kind: StimulusKind,
    images: &mut ImageCache,
) -> Result<Vec<Stimulus>, AssetError> {
    let mut paths = assets.fetch_folder(folder).await?;
    paths.sort();
    let mut stimuli = Vec::with_capacity(paths.len());
    for path in paths {
        images.insert(assets.fetch_image(&path).await?);
        let stimulus = Stimulus::new(kind, path);
        if stimulus.payload.is_unknown() {
            warn!("Could not parse {} filename: {}", kind.as_str(), stimulus.path);
        }
        stimuli.push(stimulus);
    }
    info!("Loaded {} {} images from {folder}", stimuli.len(), kind.as_str());
    Ok(stimuli)
}
