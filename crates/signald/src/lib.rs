//! Signal layer: turns raw frame observations into integrity events.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   image    ┌─────────────────┐  observation  ┌─────────────┐
//!  │  candidate   │ ─────────▶ │ InferenceClient │ ────────────▶ │ RuleEngine  │
//!  │ frame sample │            │ (face + pose)   │               │ (streaks,   │
//!  └──────────────┘            └─────────────────┘               │  cooldowns) │
//!                                                                └──────┬──────┘
//!                                                                       │ events
//!                                                                       ▼
//!                                                                ┌─────────────┐
//!                                                                │   ledger    │
//!                                                                └─────────────┘
//! ```
//!
//! The rule engine is pure: configuration and the clock are injected, so
//! every transition is reproducible in tests. The inference round trip
//! and the ledger append are the caller's side effects; the sample gate
//! runs before either, so dropped frames never perturb streaks.

pub mod inference;
pub mod rule_engine;
pub mod sample_gate;

pub use inference::{InferenceClient, InferenceError};
pub use rule_engine::{frame_digest, Evaluation, RuleConfig, RuleEngine, TriggeredSignal};
pub use sample_gate::SampleGate;
