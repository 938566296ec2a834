use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use riskex_experiment::{
    Collaborators, ExperimentConfig, ExperimentVariant, OfflineCache, ParameterFiles,
    ParameterLoader, SessionController, SessionParameters, TrialEngine,
};
use riskex_pump::{LoopbackTransport, PeripheralConfig, RewardPeripheral, RewardPump, Unplugged};
use riskex_store::{DirectorySink, FallbackSink, LocalStore};
use riskex_timing::MonotonicTimer;
use tokio::sync::watch;

use crate::assets::DirectoryAssets;
use crate::console::{Bell, ConsoleScreen, SimulatedSubject};

/// Run a risky-choice reward session.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run a risky-choice reward session", long_about = None)]
pub struct Cli {
    /// Subject name; also names the saved data files.
    #[arg(short, long)]
    pub subject: String,

    /// Parameter file, or a directory holding `<subject>_params.txt`.
    /// Defaults apply when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub params: Option<PathBuf>,

    /// detection, choice, gamble_vs_gamble, gamble_vs_sure, 3gambles or sequential.
    #[arg(short, long, default_value = "gamble_vs_sure")]
    pub variant: ExperimentVariant,

    /// Directory holding the `sure_options` and `gamble_options` image bags.
    #[arg(short, long, value_name = "DIR", default_value = "assets")]
    pub assets: PathBuf,

    /// Where session records are written.
    #[arg(short, long, value_name = "DIR", default_value = "datafiles")]
    pub data: PathBuf,

    /// Local store used when the data directory cannot be written.
    #[arg(long, value_name = "DIR", default_value = ".riskex/local")]
    pub fallback: PathBuf,

    /// Stop after this many trials (overrides `TotalTrials`).
    #[arg(short, long)]
    pub trials: Option<u64>,

    /// Run without a reward pump.
    #[arg(long)]
    pub no_pump: bool,

    /// Seed for shuffles, gamble draws and the simulated subject.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub struct App {
    cli: Cli,
    config: ExperimentConfig,
    parameters: Box<dyn ParameterLoader>,
}

impl App {
    pub async fn new(cli: Cli) -> Result<Self> {
        let config = ExperimentConfig {
            variant: cli.variant,
            sure_folder: folder(&cli.assets, "sure_options"),
            gamble_folder: folder(&cli.assets, "gamble_options"),
            tone: Some(folder(&cli.assets, "sounds/au0.wav")),
        };
        let parameters = load_parameters(cli.params.as_deref(), cli.trials).await?;

        Ok(Self {
            cli,
            config,
            parameters,
        })
    }

    pub async fn run(self) -> Result<()> {
        println!("=== RISKEX SESSION ===");
        println!("Subject: {}", self.cli.subject);
        println!("Variant: {}", self.config.variant);
        println!("Press Ctrl-C to stop after the current trial.\n");

        let seed = self.cli.seed.unwrap_or_else(rand::random);
        info!("Seed {seed}");

        let pump = self.pump();
        let sink = FallbackSink::new(
            Box::new(DirectorySink::new(&self.cli.data)),
            Box::new(LocalStore::new(&self.cli.fallback)),
        );
        let engine = TrialEngine::new(
            MonotonicTimer::new(),
            StdRng::seed_from_u64(seed),
            Collaborators {
                screen: Box::new(ConsoleScreen::default()),
                input: Box::new(SimulatedSubject::new(seed.wrapping_add(1))),
                pump,
                tone: Arc::new(Bell),
                sink: Arc::new(sink),
            },
        );
        let mut session = SessionController::new(self.config.clone(), engine);

        let (stop_tx, stop) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping after the current trial...");
                stop_tx.send_replace(true);
            }
        });

        let assets = OfflineCache::new(DirectoryAssets);
        let summary = session
            .run_session(&self.cli.subject, self.parameters.as_ref(), &assets, &stop)
            .await
            .with_context(|| format!("session for {} did not start", self.cli.subject))?;

        println!(
            "\nSession finished ({:?}): {} trials, {} blocks",
            summary.reason, summary.record.total_trials, summary.record.total_blocks
        );
        match summary.saved {
            Some(saved) => println!("Saved to {}", saved.location.display()),
            None => anyhow::bail!("session data could not be saved"),
        }
        Ok(())
    }

    fn pump(&self) -> Arc<dyn RewardPump> {
        if self.cli.no_pump {
            info!("Running without a pump");
            return Arc::new(Unplugged);
        }
        let pump = RewardPeripheral::new(
            LoopbackTransport::new("BLENano_sim"),
            PeripheralConfig::default(),
        );
        let mut states = pump.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                println!("[pump] {state}");
            }
        });
        Arc::new(pump)
    }
}

fn folder(root: &Path, name: &str) -> String {
    root.join(name).to_string_lossy().into_owned()
}

async fn load_parameters(
    path: Option<&Path>,
    trials: Option<u64>,
) -> Result<Box<dyn ParameterLoader>> {
    let Some(path) = path else {
        return Ok(Box::new(SessionParameters {
            total_trials: trials,
            ..SessionParameters::default()
        }));
    };
    if path.is_dir() {
        if trials.is_some() {
            log::warn!("--trials is ignored when parameters come from a directory");
        }
        return Ok(Box::new(ParameterFiles::new(path)));
    }

    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let mut params = SessionParameters::from_json(&text)
        .with_context(|| format!("invalid parameter file {}", path.display()))?;
    if trials.is_some() {
        params.total_trials = trials;
    }
    Ok(Box::new(params))
}
