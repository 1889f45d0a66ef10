pub mod error;
pub mod tickers;
pub mod traits;
pub mod types;

pub use error::*;
pub use tickers::*;
pub use traits::*;
pub use types::*;
