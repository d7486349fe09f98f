//! Acceptance harness for the Nimbus FlexibleEngine provider
//!
//! A [`TestCase`] is a list of [`TestStep`]s, each a desired-state document
//! plus [`Check`]s. The [`Harness`] applies every step, asserts that a second
//! plan is empty, re-imports what was asked for, destroys everything and
//! verifies with the vendor that nothing is left.
//!
//! Without `NIMBUS_ACC=1` scenarios run against the in-memory simulated cloud.

pub mod case;
pub mod check;
pub mod env;
pub mod harness;

pub use case::{ImportStep, TestCase, TestStep};
pub use check::Check;
pub use env::AccEnv;
pub use harness::{Harness, HarnessError, Outcome};
