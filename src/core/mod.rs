//! Domain types shared by the engine

pub mod expense;

pub use expense::Expense;
