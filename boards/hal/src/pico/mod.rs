#[cfg(feature = "rp2040")]
pub mod rp2040;
