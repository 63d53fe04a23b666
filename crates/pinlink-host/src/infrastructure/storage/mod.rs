//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML file that selects the
//! transport and tunes the connection timers.  Missing files and missing
//! fields fall back to defaults so a first run needs no setup.

pub mod config;
