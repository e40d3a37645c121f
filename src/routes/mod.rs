pub mod control;
pub mod history;
