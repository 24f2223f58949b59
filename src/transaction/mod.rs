pub mod amount;
pub mod model;
pub mod validator;

pub use amount::Amount;
pub use model::{Transaction, TxInput, TxOutput};
pub use validator::{OutputSource, TransactionValidator};
