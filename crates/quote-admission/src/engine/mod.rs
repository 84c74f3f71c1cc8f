pub mod slippage;

pub use slippage::{SlippageModelManager, SlippageModelSettings};
