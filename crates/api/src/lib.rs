//! Cosmos HTTP API.
//!
//! A thin axum surface over [`cosmos_orchestrator::Orchestrator`] for the UI
//! initiator. The UI's timer drives the queue through `POST
//! /api/v1/queue/tick`; nothing here runs in the background.

pub mod config;
pub mod error;
pub mod handlers;
pub mod query;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
