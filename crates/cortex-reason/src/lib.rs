pub mod preset;
pub mod recursive;

pub use preset::{Preset, PresetEngine, load_presets};
pub use recursive::{RecursiveReasoner, RecursiveResult};
