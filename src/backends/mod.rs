// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! # Modules
//!
//! - [`camera`]: Capability traits, device enumeration and frame capture

pub mod camera;
