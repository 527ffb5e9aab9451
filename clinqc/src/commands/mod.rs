// clinqc/src/commands/mod.rs

pub mod check;
pub mod history;
pub mod resolve;
pub mod run;
pub mod validate;
pub mod violations;
