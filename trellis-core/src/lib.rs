//! Trellis Core
//!
//! This crate provides the reactive-state runtime underneath the Trellis
//! framework. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Glitch-free push-pull propagation with batching
//! - Nested cleanup scopes with LIFO teardown
//! - Liveness tokens for continuations that outlive their scope
//!
//! Rendering, routing, forms and data fetching are built on top of this
//! crate and live elsewhere.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, scopes and the runtime
//! - `graph`: Dependency graph nodes and the update scheduler
//! - `config`: Runtime safety limits
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::{batch, computed, effect, signal};
//! use std::{cell::Cell, rc::Rc};
//!
//! // Create a signal
//! let count = signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     computed(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let last = Rc::new(Cell::new(0));
//! let _effect = {
//!     let (doubled, last) = (doubled.clone(), last.clone());
//!     effect(move || last.set(doubled.get()))
//! };
//!
//! // Update the signal; the effect runs once per batch
//! batch(|| {
//!     count.set(4);
//!     count.set(5);
//! });
//! assert_eq!(last.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
