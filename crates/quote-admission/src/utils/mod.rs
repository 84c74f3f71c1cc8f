pub mod address_list;
pub mod native_token;
pub mod pair_key;

pub use pair_key::PairKey;
