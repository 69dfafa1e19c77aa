pub mod github;
pub mod report;
