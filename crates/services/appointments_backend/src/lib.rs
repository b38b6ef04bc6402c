// --- File: crates/services/appointments_backend/src/lib.rs ---
pub mod service_factory;
