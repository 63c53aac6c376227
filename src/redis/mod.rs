// Redis connection bootstrap

mod client;

pub use client::{create_client, health_check};
