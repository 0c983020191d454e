//! kube-beacon forwards Kubernetes warning events to a monitoring backend,
//! enriched with pod and CronJob context, and reports CronJob runs as
//! check-in heartbeats.

pub mod backend;
pub mod background;
pub mod build_info;
pub mod cluster;
pub mod config;
pub mod events;
pub mod handlers;
pub mod integrations;
pub mod monitor;
pub mod ownership;
pub mod scope;
pub mod server;
