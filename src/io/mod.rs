// External I/O operations module
pub mod lock; // Lock file for single-instance enforcement
pub mod signals; // Unix signal handling
