//! # stfcap: live Android screen capture from the command line
//!
//! Installs and supervises `minicap` on an adb-attached device, reads the
//! JPEG stream it serves, and reports throughput until interrupted.

pub mod config;
pub mod throughput;
