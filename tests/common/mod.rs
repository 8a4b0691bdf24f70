// Integration test helpers. Each test binary compiles its own copy, so
// not every helper is used everywhere.
#![allow(dead_code)]

pub mod manifests;
pub mod server;
