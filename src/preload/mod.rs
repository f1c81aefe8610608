//! Priority-tiered cache warming

pub mod scheduler;

pub use scheduler::{
    PreloadConfig, PreloadPriority, PreloadProgress, PreloadScheduler, ViewportPreloader,
};
