//! In-crate tests for the tether CLI runtime and lifecycle controller.

mod support;
