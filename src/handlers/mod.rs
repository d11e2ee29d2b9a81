pub mod debts;
pub mod materials;
pub mod requests;
