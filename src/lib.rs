// src/lib.rs

// 1. Data Structures (The "Nouns")
// explicit 'pub' makes them available to main.rs
pub mod models;
pub mod error;

// 2. Interfaces (The "Contract")
pub mod traits;

// 3. Adapters (The "Plumbing")
pub mod connectors;

// 4. Market Discovery (The "Catalog")
pub mod catalog;

// 5. Persistence (The "Ledger")
pub mod store;

// 6. Incremental Collection (The "Harvester")
pub mod harvest;

// 7. Quant Metrics (The "Brains")
pub mod analytics;

// 8. Run Orchestration (The "Orchestrator")
pub mod engine;

pub mod config;
