//! # EBGAN Trainer
//!
//! An epoch-loop training framework with checkpointing and best-model
//! tracking, instantiated for an Energy-Based GAN built on the Burn ML
//! framework.
//!
//! ## Modules
//!
//! - [`training`]: Session trait, epoch-loop trainer, metric log, monitor
//! - [`checkpoint`]: Checkpoint directories, manifests, `model_best`, pruning
//! - [`model`]: EBGAN generator/discriminator, burn unit adapters, batch sources
//! - [`device`]: Requested vs available accelerator resolution
//! - [`config`]: TOML/JSON configuration loading and validation
//! - [`error`]: Structured error and warning types

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
mod serde_float;
pub mod training;
