mod emulator;
mod verilator;

pub use emulator::EmulatorBackend;
pub use verilator::VerilatorBackend;
