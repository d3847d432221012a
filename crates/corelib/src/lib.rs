//! Core library for the tiered thing engine.
//!
//! This crate provides the abstractions every tier shares:
//! - Tiers and full ids
//! - The host platform and its capability table
//! - Devices and the device registry
//! - The channel contract and its reference-counted lifecycle
//! - The channel factory and the built-in channels
//! - Address helpers for tiers that advertise themselves

pub mod arg;
pub mod channel;
pub mod channels;
pub mod device;
pub mod error;
pub mod factory;
pub mod network;
pub mod platform;
pub mod tier;

pub use arg::{Callback, ChannelArg};
pub use channel::{Channel, ChannelBase, ChannelExt, EventListener, ListenerId};
pub use device::{Device, DeviceDatabase, DeviceHandle, DeviceRegistry, SimpleDevice};
pub use error::{Error, Result};
pub use factory::{ChannelCatalog, ChannelContext, ChannelFactory};
pub use platform::{Capability, Platform, PlatformKind, StaticPlatform};
pub use tier::{FullId, Tier};
