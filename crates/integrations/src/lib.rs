//! Clients for the two remote collaborators: the device-state store and the
//! command interpreter. Everything above this crate talks to them through the
//! traits defined here.

pub mod device_store;
pub mod interpreter;

pub use device_store::{DeviceStateStore, DeviceStoreConfig, HttpDeviceStore};
pub use interpreter::{
    clamp_listen_duration, CommandInterpreter, HttpCommandInterpreter, InterpreterConfig,
};
