//! End-to-end scenarios across the store, orchestrator and read API.
