//! C ABI shared by the loader and the plugin SDK.

pub mod abi;
pub mod safety;
