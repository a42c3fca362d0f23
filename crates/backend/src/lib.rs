pub mod dirs;
pub mod ipc;
pub mod launcher;
pub mod notice;
pub mod settings;
pub mod supervisor;
pub mod worker;

pub use launcher::{LaunchConfig, LaunchError, LaunchMode, WorkerHandle, WorkerLauncher};
pub use notice::{Notice, NoticeLevel, Notices};
pub use settings::{SettingsError, SettingsMerger, SettingsRequest, SettingsStore, Source, Value};
pub use supervisor::LifecycleSupervisor;
