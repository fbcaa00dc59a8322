//! DSP stages for the live graph and the offline render
//!
//! Every live stage implements `ProcessingStage`. Track and master chains
//! are described by `EffectSpec` values and built in a fixed order.

pub mod chain;
pub mod convolution;
pub mod delay;
pub mod eq;
pub mod gain;
pub mod modulation;
pub mod pan;
pub mod pitch;
pub mod reverb;
pub mod saturation;
pub mod stage;

pub use chain::{build_chain, effect_specs, BuiltChain, EffectSpec, CHAIN_ORDER};
pub use delay::FeedbackDelay;
pub use eq::{BiquadFilter, FilterType};
pub use gain::{BusGain, GainRamp, Volume, MUTE_FLOOR};
pub use modulation::{Chorus, Tremolo, Vibrato};
pub use pan::{pan_gains, Panner};
pub use pitch::PitchShift;
pub use reverb::Reverb;
pub use saturation::Distortion;
pub use stage::{ProcessingStage, StageKind};
