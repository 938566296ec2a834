pub mod assets;
pub mod block;
pub mod config;
pub mod error;
pub mod response;
pub mod reward;
pub mod session;
pub mod state;
pub mod surface;

pub use assets::{AssetProvider, OfflineCache, ParameterFiles, ParameterLoader};
pub use block::{BlockOrder, StimulusPool};
pub use config::{ExperimentConfig, ExperimentVariant, Presentation, SessionParameters};
pub use error::{AssetError, ParameterError, SessionError};
pub use response::{InputSource, ResponseHandler, ResponseWindow};
pub use reward::{Delivery, PulsePlan, Resolved};
pub use session::{SessionController, SessionSummary, StopReason};
pub use state::{Collaborators, SessionState, TrialEngine};
pub use surface::{AudioClip, FeedbackTone, Headless, Screen, Silence};
