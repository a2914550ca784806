pub mod climate;
pub mod clock;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod fog;
pub mod history;
pub mod persist;
pub mod recovery;
pub mod settings_table;
pub mod topics;
pub mod types;
pub mod watering;
pub mod window;

pub use clock::{MonoMs, TickTime, UnixTime};
pub use commands::{Equipment, EquipmentRequest, FogRequest, RemoteCommand, WindowRequest};
pub use config::{ControllerConfig, NetworkConfig, RuntimeConfig, Settings};
pub use engine::{GreenhouseEngine, TickOutcome};
pub use error::{CommandError, SettingError};
pub use history::HistoryEntry;
pub use settings_table::UpdateReport;
pub use topics::*;
pub use types::{EngineAction, Relay, SensorSnapshot, TelemetryPayload, WindowDirection};
