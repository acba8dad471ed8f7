pub mod options;
pub mod preflight;
pub mod run;
