pub mod application;
pub mod collector;
pub mod config;
pub mod driver;
pub mod error;
pub mod optimiser;
pub mod progress;
pub mod reader;
pub mod sampler;

pub use application::{Application, RegApp};
pub use collector::{Collection, GradientsCollector, OutputsCollector};
pub use config::{
    Action, ActionParams, ApplicationConfig, DataParams, DataSection, NetParams, RegistrationParams,
    SystemParams, TaskSections,
};
pub use driver::{checkpoint_path, ApplicationDriver, TrainingSummary};
pub use error::{EngineError, Result};
pub use optimiser::{Optimiser, OptimiserFactory, OptimiserKind};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use reader::{ImageReader, ImageSource, Subject};
pub use sampler::PairwiseSampler;
