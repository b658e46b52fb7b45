//! Integration testing module
//!
//! In-process fakes for the network, the media engine and the speech
//! provider, plus end-to-end job and HTTP scenarios built on them.

#![cfg(test)]

pub mod fixtures;

mod e2e;
