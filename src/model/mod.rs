//! EBGAN models built from burn layers, their checkpoint adapters, batch
//! sources and the training session that ties them together.

pub mod data;
mod discriminator;
mod ebgan;
mod generator;
mod unit;

pub use data::{build_source, BatchSource, SyntheticImages, IMAGE_SIZE};
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use ebgan::{energy_metrics, pull_away, EbganSession, EnergyStats};
pub use generator::{Generator, GeneratorConfig};
pub use unit::{AdamSlot, BurnUnit, ADAM};
