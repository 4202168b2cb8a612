pub mod run;
pub mod streams;
