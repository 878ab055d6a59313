//! Domain models for Gas Town.
//!
//! # Core Concepts
//!
//! ## Service Lifecycle
//!
//! - [`ServiceRole`]: The long-lived roles a town runs. Per-rig roles
//!   (refinery, witness) and town-level singletons (mayor, boot, deacon).
//! - [`ShutdownPlan`]: Ordered phases of independent [`Unit`]s to stop.
//! - [`ShutdownResult`]: Per-unit [`UnitReport`]s plus the overall outcome.
//!
//! ## Workflows
//!
//! - [`Formula`]: Declarative step template, optionally composed from others.
//! - [`Protomolecule`]: Frozen, fully linear compilation of a formula.
//! - [`Instance`]: A poured molecule (durable) or wisp (ephemeral), with its
//!   ordered [`Step`]s.
//! - [`Digest`]: Immutable summary produced when an instance is squashed.
//! - [`AgentContext`]: Per-agent record pinning the molecule an agent works on.

mod formula;
mod molecule;
mod service;
mod shutdown;

pub use formula::*;
pub use molecule::*;
pub use service::*;
pub use shutdown::*;
