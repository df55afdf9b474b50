//! PDF upload gateway.
//!
//! Screens uploaded PDFs for risky structures (scripts, embedded files,
//! launch actions, forms, encryption) and relays the clean ones to a CMS.

pub mod config;
pub mod cors;
pub mod forwarder;
pub mod gateway;
pub mod multipart;
pub mod scanner;
pub mod server;

pub use config::Config;
pub use forwarder::{CmsForwarder, DownstreamResponse, ForwardError, Forwarder};
pub use gateway::{GatewayResponse, GatewayStats, UploadGateway, UploadRequest};
pub use scanner::{inspect, scan, RejectReason, ScanFindings, ScanInput, ScanReport, Verdict};
pub use server::GatewayServer;
