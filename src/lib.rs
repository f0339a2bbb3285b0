pub mod nes;
