//! TavernTapes - long-form session recorder for tabletop games
//!
//! Records multi-hour audio sessions with pause/resume, automatic
//! segmentation into bounded files, per-segment durable persistence,
//! and crash-resilient recovery of an interrupted session.
//!
//! # Architecture
//!
//! The crate follows hexagonal (ports & adapters) architecture:
//!
//! - **Domain**: entities, value objects, the recorder state machine,
//!   the level meter, settings, and validation rules
//! - **Application**: use cases (recording engine, catalog, startup
//!   maintenance) and port interfaces (traits)
//! - **Infrastructure**: adapter implementations (cpal capture, WAV
//!   and Opus/Ogg encoders, file-backed stores, system clock)
//! - **CLI**: a thin host binary layered on the in-process API

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
