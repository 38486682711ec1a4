pub mod check;
pub mod reset;
pub mod run;
pub mod stats;
