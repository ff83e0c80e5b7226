//! Library surface kept thin on purpose: only the pieces worth exercising
//! from an integration test (the config loader) are public here. The
//! orchestration modules (`cli`, `ticker`, `shutdown`, `cleanup`) stay
//! private to the binary, the same split `tokf-cli` draws between its
//! `lib.rs` and `main.rs`.

pub mod config_loader;
