//! Shared utilities for redeploy integration tests.
//!
//! - `TestHarness`: temp work directory plus local upstream git repositories
//! - fakes for the container engine, registry publisher and notifier
//! - `FakeRegistry`: in-process OCI registry for publish runs

pub mod fakes;
pub mod harness;
pub mod registry;

pub use fakes::{FakeEngine, FakePublisher, RecordingNotifier};
pub use harness::TestHarness;
pub use registry::FakeRegistry;
