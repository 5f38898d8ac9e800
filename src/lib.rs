// Error taxonomy
pub mod error;

// Shared SQLite database
pub mod db;

// Integration records and token encryption
pub mod credentials;

// Mirrored event storage
pub mod events;

// Remote calendar provider
pub mod provider;

// Token lifecycle, reconciliation and periodic sync
pub mod sync;

// Authorization code flow
pub mod oauth;

// Owner-facing operations
pub mod service;

// Owner identity from bearer tokens
pub mod auth;

// HTTP API
pub mod api;

// Configuration
pub mod config;
