//! Accelerator Comprehensive Test Suite
//!
//! Cross-cutting tests for the vector core through the `strata_vector`
//! facade.
//!
//! ## Test Tier Structure
//!
//! - **Tier 1: Fallback Policy** (construction never fails when fallback is on)
//! - **Tier 2: Concurrency** (concurrent search, mutation vs. search atomicity)
//! - **Tier 3: Properties** (ranking order, sync state machine under random ops)
//! - **Tier 4: Configuration Files** (accel.toml load/write)
//!
//! ## Running Tests
//!
//! ```bash
//! # Run the whole suite
//! cargo test --test accel_comprehensive
//!
//! # Run one tier
//! cargo test --test accel_comprehensive tier2
//!
//! # Against real hardware
//! cargo test --test accel_comprehensive --features gpu-cuda -- --nocapture
//! ```

mod test_utils;

mod tier1_fallback_policy;
mod tier2_concurrency;
mod tier3_properties;
mod tier4_config_files;
