pub mod analysis_service;
pub mod compatibility_service;
pub mod experiment_service;
pub mod sufficiency_service;
