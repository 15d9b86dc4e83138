pub mod feature_gate;

pub use feature_gate::{FeatureGate, FeatureGateConfig};
