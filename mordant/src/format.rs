pub mod external {
	pub mod bytes;
	pub use bytes::Bytes;
}

pub mod game {
	pub mod mtrl;
	pub use mtrl::Mtrl;
	pub mod stm;
	pub use stm::Stm;
}
