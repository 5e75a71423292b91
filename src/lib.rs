//! Camera discovery, recording and snapshot service with a JSON-RPC
//! control plane: enumerates locally attached capture devices, orchestrates
//! recording and snapshot sessions against a Media Router, and exposes the
//! whole thing over a JSON-RPC 2.0 message stream.

pub mod auth;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod health;
pub mod process;
pub mod recording;
pub mod router;
pub mod rpc;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
