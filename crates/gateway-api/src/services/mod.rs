//! 백그라운드 서비스 모듈.

pub mod client_supervisor;

pub use client_supervisor::{ClientFactory, ClientSupervisor, VenueClientFactory};
