//! Integration test support for the ZEN wallet engine.
//!
//! [`sim::SimNode`] stands in for a zend node so the engine can be driven
//! end to end: fund, spend, mine, bump and co-sign.

pub mod sim;
