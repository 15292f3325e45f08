pub mod analysis;
pub mod checkin;
pub mod compatibility;
pub mod experiment;
