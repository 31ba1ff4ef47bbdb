pub mod availability;
pub mod committer;
pub mod controller;
pub mod form;
pub mod selection;
pub mod wizard;
