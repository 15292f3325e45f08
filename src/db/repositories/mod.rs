pub mod checkin_repository;
pub mod experiment_repository;
pub mod result_repository;
