pub mod arena;
pub mod ast;
pub mod builder;
pub mod constant;
pub mod diag;
pub mod error;
pub mod eval;
pub mod executor;
pub mod invocation;
pub mod memory;
pub mod number;
pub mod scope;
pub mod source;
pub mod types;
pub mod workgroup;

#[cfg(test)]
mod invocation_tests;
