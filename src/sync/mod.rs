mod service;
mod status;

pub use service::ExpenseService;
