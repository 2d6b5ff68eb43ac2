//! Read-through, write-invalidated cache in front of a facilities-maintenance
//! document store (sites, buildings, equipment, inspections, inspectors, users).

pub mod cache;
pub mod config;
pub mod firestore;
pub mod logging;
pub mod remote;
pub mod session;
