pub mod clock;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod monitor;
pub mod session_management;
pub mod storage;
pub mod switching;
pub mod termination;
