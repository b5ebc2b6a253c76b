//! Watch one Slack channel and relay matching messages to target channels.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod rules;
pub mod slack;
