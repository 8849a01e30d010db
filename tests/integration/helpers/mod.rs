#![allow(dead_code)]

pub mod test_config;

pub use test_config::{create_test_config, demo_spans, wait_until};
