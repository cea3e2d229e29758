pub mod media;
pub mod package;
pub mod parts;
pub mod reconstruct;
pub mod xml;
