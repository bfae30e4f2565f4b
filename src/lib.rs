pub mod commands;
pub mod config;
pub mod constants;
pub mod demux;
pub mod dvrip;
pub mod error;
pub mod extractor;
pub mod marker;
pub mod poller;
pub mod protocol;
pub mod scanner;
pub mod scorer;
pub mod vision;

pub use commands::*;
pub use config::Config;
pub use dvrip::{DVRIPCam, open_session};
pub use error::{DVRIPError, Result};
pub use extractor::{CameraArchive, ExtractionReason, ExtractionResult, HybridExtractor, SourceTier};
pub use marker::{EventMarker, FileKind};
pub use poller::{AlarmPoller, AlarmStore};
pub use scanner::{scan_camera, scan_recent};
