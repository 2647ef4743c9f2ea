mod arch;
mod build;
mod config;
mod error;
mod harness;
mod interrupt;
mod process;
mod report;
mod runners;
mod suite;
mod types;

pub mod suites;
pub mod verify;

pub use arch::{Backend, BackendKind, BackendSelector};
pub use build::{Toolchain, encode_hex, flatten_elf, write_hex_image};
pub use config::HarnessConfig;
pub use error::{ErrorKind, TestError};
pub use harness::TestContext;
pub use interrupt::{
    InterruptPipe, PulseTrain, collect_from_guest, deliver_to_guest, read_available,
};
pub use process::{Invocation, RunningProcess, run, spawn};
pub use report::print_summary;
pub use runners::{EmulatorBackend, VerilatorBackend};
pub use suite::{
    Selection, Suite, SuiteReport, TestCase, TestProcedure, TestRegistry, TestReport,
};
pub use types::{BuildResult, DumpRequest, RunOptions, RunResult, TestStatus};
