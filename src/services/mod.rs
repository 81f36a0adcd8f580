//! Services shared by the request pipeline

pub mod codec;

pub use codec::ImageCodec;
