#![allow(dead_code)]

pub mod platform_mock;

pub use platform_mock::{mount_platform, requests_to, setup_platform_mock, PlatformBehaviour, TOKEN};
