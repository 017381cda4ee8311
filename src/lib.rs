//! Core library for the Prodigy Remote In areaDetector driver core.
//!
//! This crate implements the hardware-facing half of an EPICS areaDetector driver for
//! the SPECS KREIOS-150 momentum-microscope electron analyzer: a TCP client speaking the
//! Prodigy Remote In v1.22 text protocol, independent of the areaDetector framework
//! plumbing (parameter library, NDArray pool, asyn port driver) that would sit above it.

pub mod acquisition;
pub mod broker;
pub mod config;
pub mod data_reader;
pub mod error;
pub mod model;
pub mod parameters;
pub mod protocol;
pub mod published_state;
pub mod spectrum;
pub mod testing;
