//! Cloud Firestore REST backend for the document store contract.

pub mod api_types;
mod client;

pub use client::FirestoreClient;
